//! Flow rule installation on configured ports.

use dpdk_wire::api::rte::eth::{EtherAddr, PortId};
use dpdk_wire::api::rte::flow::{EthHeader, Flow, FlowAction, FlowAttr, FlowError, FlowItem};
use tracing::{info, warn};

/// Installs device-evaluated match/action rules.
pub struct FlowEngine;

impl FlowEngine {
    /// Validate, then create. The rule is active when this returns.
    pub fn install(
        port: PortId,
        attr: &FlowAttr,
        pattern: &[FlowItem],
        actions: &[FlowAction],
    ) -> Result<Flow, FlowError> {
        if let Err(e) = Flow::validate(port, attr, pattern, actions) {
            warn!(port_id = port, error = %e, "Flow rule rejected");
            return Err(e);
        }
        let flow = Flow::create(port, attr, pattern, actions)?;
        info!(port_id = port, rule = flow.id(), "Flow rule installed");
        Ok(flow)
    }

    /// Drop every ingress frame whose destination MAC is exactly `mac`.
    ///
    /// The rule also counts, so [`Flow::query_hits`] works on it.
    pub fn drop_dst_mac(port: PortId, mac: EtherAddr) -> Result<Flow, FlowError> {
        let pattern = [
            FlowItem::Eth {
                spec: Some(EthHeader {
                    dst: mac,
                    ..Default::default()
                }),
                mask: Some(EthHeader {
                    dst: EtherAddr::BROADCAST,
                    ..Default::default()
                }),
            },
            FlowItem::End,
        ];
        let actions = [FlowAction::Count, FlowAction::Drop, FlowAction::End];
        Self::install(port, &FlowAttr::ingress(), &pattern, &actions)
    }

    /// Remove every rule on `port`.
    pub fn flush(port: PortId) -> Result<(), FlowError> {
        Flow::flush(port)?;
        info!(port_id = port, "Flow rules flushed");
        Ok(())
    }
}
