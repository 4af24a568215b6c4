use nf_sync_proto::{NetworkSliceResponse, PlmnId};
use prost::Message;

#[test]
fn test_partial_snapshot_json_defaults_missing_fields() {
    // Distributor debug dumps omit empty fields; they must still parse.
    let json = r#"{
        "network_slice": [
            {
                "name": "slice-1",
                "nssai": { "sst": "1", "sd": "010203" },
                "device_group": [
                    { "name": "iot", "imsi": ["208930000000001"] }
                ],
                "site": { "site_name": "edge", "plmn": { "mcc": "208", "mnc": "93" } }
            }
        ],
        "restart_counter": 7
    }"#;

    let response: NetworkSliceResponse = serde_json::from_str(json).unwrap();
    assert_eq!(response.restart_counter, 7);
    assert_eq!(response.config_updated, 0);

    let slice = &response.network_slice[0];
    assert_eq!(slice.device_group[0].ip_domain_details, None);
    assert_eq!(slice.device_group[0].imsi, vec!["208930000000001"]);
    assert_eq!(
        slice.site.as_ref().and_then(|site| site.plmn.clone()),
        Some(PlmnId {
            mcc: "208".to_string(),
            mnc: "93".to_string(),
        })
    );
}

#[test]
fn test_empty_update_decodes_from_wire() {
    // An "everything deleted" update carries only the counter and the flag.
    let bytes = NetworkSliceResponse {
        network_slice: vec![],
        restart_counter: 42,
        config_updated: 1,
    }
    .encode_to_vec();

    let decoded = NetworkSliceResponse::decode(bytes.as_slice()).unwrap();
    assert!(decoded.network_slice.is_empty());
    assert_eq!(decoded.restart_counter, 42);
    assert_eq!(decoded.config_updated, 1);
}
