//! Gateway API support (v1)
//!
//! - GatewayClass: controller identity
//! - Gateway: listener validation and admission
//! - HTTPRoute: hostname checks and listener binding
//! - Secret: TLS key material snapshots
//! - GatewayIndex / KeyNormalizer: cross-reference fan-out

pub mod admission;
#[allow(clippy::module_inception)]
pub mod gateway;
pub mod gateway_class;
pub mod gateway_index;
pub mod http_route;
pub mod key_normalizer;
pub mod secret;
