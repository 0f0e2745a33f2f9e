use crate::constants::GrpcId;
use serde_json::{json, Value};

/// One call inside a batch-execute request.
///
/// `identifier` distinguishes responses when several calls share a batch;
/// it comes back as the last element of each response part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcData {
    pub rpc_id: GrpcId,
    pub payload: String,
    pub identifier: String,
}

impl RpcData {
    pub fn new(rpc_id: GrpcId, payload: impl Into<String>) -> Self {
        Self {
            rpc_id,
            payload: payload.into(),
            identifier: "generic".to_string(),
        }
    }

    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = identifier.into();
        self
    }

    pub fn serialize(&self) -> Value {
        json!([self.rpc_id.as_str(), self.payload, null, self.identifier])
    }
}
