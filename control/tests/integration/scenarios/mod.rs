//! Integration test scenarios

pub mod gateway_lifecycle;
pub mod properties;
pub mod route_binding;
pub mod tls_secrets;

use common::{ConfigGraph, VsNode};

/// The single virtual service of a Gateway graph
pub fn single_vs(graph: &ConfigGraph) -> Option<&VsNode> {
    match graph.vs_nodes() {
        [vs] => Some(vs),
        _ => None,
    }
}

/// `(enable_ssl of the first port, number of SSL key/cert refs)`
pub fn tls_shape(graph: &ConfigGraph) -> Option<(bool, usize)> {
    let vs = single_vs(graph)?;
    let port = vs.port_proto.first()?;
    Some((port.enable_ssl, vs.ssl_key_cert_refs.len()))
}
