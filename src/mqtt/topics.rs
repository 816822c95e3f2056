//! MQTT topic surface (spec §6). Centralized so the router (C9) and
//! transport (C3) agree on exact strings without repeating literals.

pub const RPC_REQUEST_FILTER: &str = "v1/devices/me/rpc/request/+";
pub const ATTRIBUTES_RESPONSE_FILTER: &str = "v1/devices/me/attributes/response/+";
pub const ATTRIBUTES_FILTER: &str = "v1/devices/me/attributes";
pub const FW_RESPONSE_FILTER: &str = "v2/fw/response/+";

pub const TELEMETRY: &str = "v1/devices/me/telemetry";
pub const ATTRIBUTES: &str = "v1/devices/me/attributes";

pub const SUBSCRIBE_FILTERS: [&str; 4] = [
    RPC_REQUEST_FILTER,
    ATTRIBUTES_RESPONSE_FILTER,
    ATTRIBUTES_FILTER,
    FW_RESPONSE_FILTER,
];

pub fn rpc_response(request_id: &str) -> String {
    format!("v1/devices/me/rpc/response/{request_id}")
}

pub fn attributes_request(request_id: u64) -> String {
    format!("v1/devices/me/attributes/request/{request_id}")
}

pub fn provision_request() -> &'static str {
    "/provision/request"
}

pub fn provision_response() -> &'static str {
    "/provision/response"
}

/// Extracts the trailing path segment of an RPC request topic, used as the
/// correlation id for the matching response.
pub fn rpc_request_id(topic: &str) -> Option<&str> {
    if topic.starts_with("v1/devices/me/rpc/request/") {
        topic.rsplit('/').next()
    } else {
        None
    }
}

pub fn is_rpc_request(topic: &str) -> bool {
    topic.contains("v1/devices/me/rpc/request")
}

pub fn is_attributes(topic: &str) -> bool {
    topic.contains("v1/devices/me/attributes")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_request_id_from_rpc_topic() {
        assert_eq!(rpc_request_id("v1/devices/me/rpc/request/17"), Some("17"));
        assert_eq!(rpc_request_id("v1/devices/me/attributes"), None);
    }
}
