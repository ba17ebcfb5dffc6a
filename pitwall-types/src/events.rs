//! Queue event types exchanged between the REST edge and the worker.

use serde::{Deserialize, Serialize};

use crate::{ConnectionId, DriverId};

/// An ingestion job, serialized as JSON onto the durable queue.
///
/// Field names are part of the queue wire contract and must not change.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IngestionJob {
    /// Driver whose races should be ingested.
    #[serde(rename = "driverId")]
    pub driver_id: DriverId,
    /// Upstream access token to perform the ingestion with.
    #[serde(rename = "IRacingAccessToken")]
    pub iracing_access_token: String,
    /// Connection to stream progress to; absent means no progress pushes.
    #[serde(
        rename = "notifyConnectionId",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub notify_connection_id: Option<ConnectionId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_wire_names_are_stable() {
        let job = IngestionJob {
            driver_id: DriverId::new(77),
            iracing_access_token: "token".to_owned(),
            notify_connection_id: Some(ConnectionId::new("conn-1")),
        };
        let json = serde_json::to_value(&job).unwrap();
        assert_eq!(json["driverId"], 77);
        assert_eq!(json["IRacingAccessToken"], "token");
        assert_eq!(json["notifyConnectionId"], "conn-1");
    }

    #[test]
    fn missing_notify_connection_deserializes_to_none() {
        let job: IngestionJob =
            serde_json::from_str(r#"{"driverId":1,"IRacingAccessToken":"t"}"#).unwrap();
        assert_eq!(job.notify_connection_id, None);
    }
}
