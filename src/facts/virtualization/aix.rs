//! AIX logical partitions

use super::{render, VirtualizationInfo};
use crate::facts::probe::{FactProbe, Fragment, ProbeContext};
use crate::facts::util::key_values;
use crate::facts::{FactCategory, FactError};
use async_trait::async_trait;

pub struct AixVirtualization;

#[async_trait]
impl FactProbe for AixVirtualization {
    fn category(&self) -> FactCategory {
        FactCategory::Virtualization
    }

    fn name(&self) -> &'static str {
        "aix_virtual"
    }

    async fn collect(&self, ctx: &ProbeContext, fragment: &mut Fragment) -> Result<(), FactError> {
        let lparstat = ctx.stdout(fragment, "lparstat", &["-i"]).await?;
        let found = lparstat.as_deref().and_then(lpar_type);
        render(found, fragment);
        Ok(())
    }
}

/// `Type : Shared-SMT-4` or `Type : Dedicated`.
fn lpar_type(output: &str) -> Option<VirtualizationInfo> {
    key_values(output, ':')
        .get("Type")
        .filter(|t| t.contains("Dedicated") || t.contains("Shared"))
        .map(|_| VirtualizationInfo::guest("powervm_lpar"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lparstat() {
        let output = "Node Name                                  : aix01\n\
                      Partition Name                             : aix01-lpar\n\
                      Type                                       : Shared-SMT-4\n\
                      Mode                                       : Uncapped\n";
        assert_eq!(
            lpar_type(output),
            Some(VirtualizationInfo::guest("powervm_lpar"))
        );
        assert_eq!(lpar_type("Node Name : aix01\n"), None);
    }
}
