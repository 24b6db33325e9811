//! Publishing through the sink registry with an in-memory sink.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use diversion_core::{
    DiversionService, LayerBinding, LayerId, LayerSink, LayerTable, PipelineConfig, PortError,
    RawFacilityRow, RawMaterialEntry, SinkRegistry, WriteMode,
};

#[derive(Default)]
struct MemorySink {
    writes: Mutex<Vec<(LayerId, WriteMode, Vec<serde_json::Value>)>>,
}

impl MemorySink {
    fn writes(&self) -> Vec<(LayerId, WriteMode, Vec<serde_json::Value>)> {
        self.writes.lock().expect("sink lock").clone()
    }
}

#[async_trait]
impl LayerSink for MemorySink {
    fn describe(&self) -> String {
        "memory".to_owned()
    }

    async fn write(&self, table: &LayerTable<'_>, mode: WriteMode) -> Result<usize, PortError> {
        let rows = table.json_rows()?;
        let written = rows.len();
        self.writes
            .lock()
            .map_err(|err| PortError::Internal(err.to_string()))?
            .push((table.layer, mode, rows));
        Ok(written)
    }
}

fn rows() -> Vec<RawFacilityRow> {
    let mut closed = RawFacilityRow {
        facility_id: Some("SW0901".to_owned()),
        name: "Old Transfer Station".to_owned(),
        county: "Weber".to_owned(),
        status: "Closed".to_owned(),
        calendar_year: "2023".to_owned(),
        ..RawFacilityRow::default()
    };
    closed.materials.push(RawMaterialEntry {
        label: "Paper".to_owned(),
        field: "recycled".to_owned(),
        value: Some("15".to_owned()),
    });

    let open = RawFacilityRow {
        facility_id: Some("SW0902".to_owned()),
        name: "Ogden Materials Recovery".to_owned(),
        county: "Weber".to_owned(),
        status: "Open".to_owned(),
        latitude: Some("41.22".to_owned()),
        longitude: Some("-111.97".to_owned()),
        calendar_year: "2023".to_owned(),
        last_modified: None,
        materials: vec![
            RawMaterialEntry {
                label: "Cardboard".to_owned(),
                field: "recycled".to_owned(),
                value: Some("1,250".to_owned()),
            },
            RawMaterialEntry {
                label: "Yard Trimmings".to_owned(),
                field: "composted".to_owned(),
                value: Some("300".to_owned()),
            },
        ],
    };

    vec![closed, open]
}

#[tokio::test]
async fn publish_replaces_every_layer() {
    let sink = Arc::new(MemorySink::default());
    let shared: Arc<dyn LayerSink> = sink.clone();
    let service = DiversionService::new(
        PipelineConfig::new(2023),
        Arc::new(SinkRegistry::uniform(&shared)),
    )
    .expect("valid config");

    let run = service.publish_run(&rows());
    let summary = service.publish(&run.report).await.expect("publish succeeds");

    assert!(!summary.empty);
    assert_eq!(
        summary.layers,
        vec![
            (LayerId::Facilities, 2),
            (LayerId::Counties, 2),
            (LayerId::Statewide, 1),
            (LayerId::MaterialsRecycled, 14),
            (LayerId::MaterialsComposted, 14),
        ]
    );

    let writes = sink.writes();
    assert!(writes.iter().all(|(_, mode, _)| *mode == WriteMode::Replace));

    let (_, _, facilities) = writes.first().expect("facility layer written");
    let closed_flags: Vec<bool> = facilities
        .iter()
        .filter_map(|row| row.get("closed").and_then(serde_json::Value::as_bool))
        .collect();
    assert_eq!(closed_flags, vec![true, false]);

    let (_, _, statewide) = writes.get(2).expect("statewide layer written");
    let recycled = statewide
        .first()
        .and_then(|row| row.get("recycled_tons"))
        .and_then(serde_json::Value::as_f64);
    assert_eq!(recycled, Some(1250.0));
}

#[tokio::test]
async fn empty_report_still_clears_every_layer() {
    let sink = Arc::new(MemorySink::default());
    let shared: Arc<dyn LayerSink> = sink.clone();
    let service = DiversionService::new(
        PipelineConfig::new(2024),
        Arc::new(SinkRegistry::uniform(&shared)),
    )
    .expect("valid config");

    let run = service.publish_run(&rows());
    let summary = service.publish(&run.report).await.expect("publish succeeds");

    assert!(summary.empty);
    assert_eq!(sink.writes().len(), LayerId::ALL.len());
    assert!(summary.layers.iter().all(|(_, written)| *written == 0));
}

#[tokio::test]
async fn missing_binding_is_reported() {
    let sink: Arc<dyn LayerSink> = Arc::new(MemorySink::default());
    let registry = SinkRegistry::new(vec![LayerBinding {
        layer: LayerId::Facilities,
        sink,
    }]);
    let service = DiversionService::new(PipelineConfig::new(2023), Arc::new(registry))
        .expect("valid config");

    let run = service.publish_run(&rows());
    let err = service.publish(&run.report).await.expect_err("counties unbound");

    assert!(matches!(err, PortError::UnregisteredLayer(LayerId::Counties)));
}
