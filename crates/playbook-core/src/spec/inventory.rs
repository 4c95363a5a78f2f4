use indexmap::IndexMap;
use std::sync::Arc;

use crate::client::{EthClient, NodeConnector};
use crate::errors::{PlaybookError, PlaybookErrorExt, PlaybookResult};
use crate::playbook_error;
use crate::Context;

pub struct LiveNode {
    pub url: String,
    pub client: Arc<dyn EthClient>,
}

/// Returns the first node of `group` that answers `net_version`. Other groups are never contacted.
pub async fn select_live_node(
    inventory: Option<&IndexMap<String, Vec<String>>>,
    group: &str,
    connector: &dyn NodeConnector,
    ctx: &Context,
) -> PlaybookResult<LiveNode> {
    let Some(inventory) = inventory else {
        return Err(playbook_error!(PlaybookError::Validation, "playbook must contain INVENTORY section"));
    };
    let nodes = inventory
        .get(group)
        .ok_or_else(|| playbook_error!(PlaybookError::Validation, "node group '{}' is not declared", group))
        .with_site("INVENTORY", group)?;
    for url in nodes.iter() {
        let client = match connector.connect(url).await {
            Ok(client) => client,
            Err(e) => {
                ctx.try_log(|logger| warn!(logger, "failed to open node {}: {:?}", url, e));
                continue;
            }
        };
        match client.rpc_call("net_version", vec![]).await {
            Ok(version) => {
                ctx.try_log(|logger| info!(logger, "using node {} (network {})", url, version));
                return Ok(LiveNode { url: url.clone(), client });
            }
            Err(e) => {
                ctx.try_log(|logger| warn!(logger, "node {} is not responding: {:?}", url, e));
            }
        }
    }
    Err(playbook_error!(PlaybookError::Validation, "no live nodes found in group '{}'", group))
        .with_site("INVENTORY", group)
}
