//! Layer sink for a hosted feature service (`FeatureServer` layer endpoints).

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};
use tracing::{debug, info};

use diversion_core::{
    ports::{LayerId, LayerSink, LayerTable, PortError, WriteMode},
    registry::{LayerBinding, SinkRegistry},
};

/// Spatial reference of every geometry written (WGS84).
pub const WGS84: u32 = 4326;

/// Field holding a facility's coordinates in the facility layer rows.
const LOCATION_FIELD: &str = "location";

/// Connection settings for the feature service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct FeatureServiceConfig {
    /// Token appended to every request, if the service needs one.
    #[serde(default)]
    pub token: Option<String>,
    /// Layer endpoint URL per published layer.
    #[serde(default)]
    pub layers: BTreeMap<LayerId, String>,
}

/// Error payload the service embeds in an otherwise successful response.
#[derive(Debug, Deserialize)]
struct ServiceError {
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    message: String,
    #[serde(default)]
    details: Vec<String>,
}

impl ServiceError {
    fn describe(&self) -> String {
        let mut text = match self.code {
            Some(code) => format!("{code}: {}", self.message),
            None => self.message.clone(),
        };
        if !self.details.is_empty() {
            text.push_str(" (");
            text.push_str(&self.details.join("; "));
            text.push(')');
        }
        text
    }
}

/// Response from deleteFeatures and addFeatures.
#[derive(Debug, Deserialize)]
struct EditResponse {
    #[serde(default)]
    error: Option<ServiceError>,
    #[serde(default)]
    success: Option<bool>,
    #[serde(default, rename = "addResults")]
    add_results: Vec<EditResult>,
}

/// Outcome of one added feature.
#[derive(Debug, Deserialize)]
struct EditResult {
    success: bool,
    #[serde(default)]
    error: Option<ServiceError>,
}

/// Sink writing one layer table to one feature service layer endpoint.
pub struct FeatureServiceSink {
    client: Client,
    layer_url: String,
    token: Option<String>,
}

impl FeatureServiceSink {
    /// Create a sink for the layer endpoint at `layer_url`.
    #[must_use]
    pub fn new(client: Client, layer_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            client,
            layer_url: layer_url.into().trim_end_matches('/').to_owned(),
            token,
        }
    }

    fn edit(&self, operation: &str, params: &[(&str, String)]) -> RequestBuilder {
        let mut form: Vec<(&str, String)> = vec![("f", "json".to_owned())];
        form.extend(params.iter().cloned());
        if let Some(token) = &self.token {
            form.push(("token", token.clone()));
        }
        self.client
            .post(format!("{}/{operation}", self.layer_url))
            .form(&form)
    }

    async fn delete_all(&self) -> Result<(), PortError> {
        let response =
            fetch_json::<EditResponse>(self.edit("deleteFeatures", &[("where", "1=1".to_owned())]))
                .await?;
        check_delete(&response)?;
        debug!(layer_url = %self.layer_url, "deleted existing features");
        Ok(())
    }

    async fn add(&self, features: Vec<Value>) -> Result<usize, PortError> {
        let payload = serde_json::to_string(&features)?;
        let response = fetch_json::<EditResponse>(self.edit(
            "addFeatures",
            &[
                ("features", payload),
                ("rollbackOnFailure", "true".to_owned()),
            ],
        ))
        .await?;
        count_added(&response, features.len())
    }
}

#[async_trait]
impl LayerSink for FeatureServiceSink {
    fn describe(&self) -> String {
        self.layer_url.clone()
    }

    async fn write(&self, table: &LayerTable<'_>, mode: WriteMode) -> Result<usize, PortError> {
        if mode == WriteMode::Replace {
            self.delete_all().await?;
        }

        let features = table
            .json_rows()?
            .into_iter()
            .map(to_feature)
            .collect::<Result<Vec<_>, _>>()?;
        if features.is_empty() {
            return Ok(0);
        }

        let added = self.add(features).await?;
        info!(layer = %table.layer, layer_url = %self.layer_url, added, "features loaded");
        Ok(added)
    }
}

/// Build a registry with one feature service sink per configured layer.
#[must_use]
pub fn registry(client: &Client, config: &FeatureServiceConfig) -> SinkRegistry {
    let bindings = config
        .layers
        .iter()
        .map(|(layer, url)| {
            let sink: Arc<dyn LayerSink> = Arc::new(FeatureServiceSink::new(
                client.clone(),
                url.clone(),
                config.token.clone(),
            ));
            LayerBinding {
                layer: *layer,
                sink,
            }
        })
        .collect();
    SinkRegistry::new(bindings)
}

/// Turn one table row into a feature.
///
/// Nested objects are flattened into `parent_child` attributes. A row's
/// `location` becomes a WGS84 point geometry; rows without one carry no
/// geometry.
///
/// # Errors
///
/// Returns [`PortError::Internal`] when the row is not a JSON object.
pub fn to_feature(row: Value) -> Result<Value, PortError> {
    let Value::Object(mut fields) = row else {
        return Err(PortError::Internal(
            "layer row did not encode as a JSON object".to_owned(),
        ));
    };

    let geometry = fields.remove(LOCATION_FIELD).and_then(|location| point(&location));

    let mut attributes = Map::new();
    flatten_into(&mut attributes, None, fields);

    let mut feature = Map::new();
    feature.insert("attributes".to_owned(), Value::Object(attributes));
    if let Some(geometry) = geometry {
        feature.insert("geometry".to_owned(), geometry);
    }
    Ok(Value::Object(feature))
}

fn point(location: &Value) -> Option<Value> {
    let latitude = location.get("latitude")?.as_f64()?;
    let longitude = location.get("longitude")?.as_f64()?;
    Some(json!({
        "x": longitude,
        "y": latitude,
        "spatialReference": { "wkid": WGS84 },
    }))
}

fn flatten_into(target: &mut Map<String, Value>, prefix: Option<&str>, fields: Map<String, Value>) {
    for (key, value) in fields {
        let name = match prefix {
            Some(prefix) => format!("{prefix}_{key}"),
            None => key,
        };
        match value {
            Value::Object(nested) => flatten_into(target, Some(&name), nested),
            Value::Array(items) => {
                target.insert(name, Value::String(Value::Array(items).to_string()));
            }
            scalar => {
                target.insert(name, scalar);
            }
        }
    }
}

fn check_delete(response: &EditResponse) -> Result<(), PortError> {
    if let Some(error) = &response.error {
        return Err(PortError::Rejected(format!(
            "deleteFeatures failed: {}",
            error.describe()
        )));
    }
    if response.success == Some(false) {
        return Err(PortError::Rejected("deleteFeatures reported failure".to_owned()));
    }
    Ok(())
}

fn count_added(response: &EditResponse, sent: usize) -> Result<usize, PortError> {
    if let Some(error) = &response.error {
        return Err(PortError::Rejected(format!(
            "addFeatures failed: {}",
            error.describe()
        )));
    }

    let failures: Vec<String> = response
        .add_results
        .iter()
        .filter(|result| !result.success)
        .map(|result| {
            result
                .error
                .as_ref()
                .map_or_else(|| "unknown error".to_owned(), ServiceError::describe)
        })
        .collect();
    if !failures.is_empty() {
        return Err(PortError::Rejected(format!(
            "{} of {sent} features rejected: {}",
            failures.len(),
            failures.join("; ")
        )));
    }

    if response.add_results.len() != sent {
        return Err(PortError::Rejected(format!(
            "sent {sent} features, service acknowledged {}",
            response.add_results.len()
        )));
    }

    Ok(sent)
}

// Small helper to fetch and decode JSON with status handling.
async fn fetch_json<T: DeserializeOwned>(req: RequestBuilder) -> Result<T, PortError> {
    req.send()
        .await
        .map_err(PortError::from)?
        .error_for_status()
        .map_err(PortError::from)?
        .json()
        .await
        .map_err(PortError::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(body: &str) -> EditResponse {
        serde_json::from_str(body).expect("valid response")
    }

    #[test]
    fn facility_row_gets_point_geometry_and_flat_attributes() {
        let row = json!({
            "id": "SW0101",
            "closed": false,
            "location": { "latitude": 41.73, "longitude": -111.83 },
            "diverted_tons": 160.0,
            "materials": { "Paper": { "recycled": 120.0, "composted": 0.0 } },
        });

        let feature = to_feature(row).expect("object row");

        assert_eq!(
            feature,
            json!({
                "attributes": {
                    "id": "SW0101",
                    "closed": false,
                    "diverted_tons": 160.0,
                    "materials_Paper_recycled": 120.0,
                    "materials_Paper_composted": 0.0,
                },
                "geometry": { "x": -111.83, "y": 41.73, "spatialReference": { "wkid": 4326 } },
            })
        );
    }

    #[test]
    fn rows_without_location_have_no_geometry() {
        let feature = to_feature(json!({ "name": "Cache", "location": null })).expect("object row");

        assert_eq!(feature, json!({ "attributes": { "name": "Cache" } }));
    }

    #[test]
    fn non_object_rows_are_internal_errors() {
        assert!(matches!(to_feature(json!([1, 2])), Err(PortError::Internal(_))));
    }

    #[test]
    fn failed_add_results_are_rejections() {
        let body = r#"{"addResults":[
            {"objectId":1,"success":true},
            {"success":false,"error":{"code":1000,"description":"","message":"Invalid field"}}
        ]}"#;

        let err = count_added(&response(body), 2).expect_err("one feature failed");

        assert!(matches!(err, PortError::Rejected(message) if message.contains("1000: Invalid field")));
    }

    #[test]
    fn service_error_payload_is_a_rejection() {
        let body = r#"{"error":{"code":498,"message":"Invalid token.","details":[]}}"#;

        assert!(matches!(check_delete(&response(body)), Err(PortError::Rejected(_))));
        assert!(matches!(count_added(&response(body), 3), Err(PortError::Rejected(_))));
    }

    #[test]
    fn successful_edits_are_counted() {
        let body = r#"{"addResults":[{"objectId":7,"success":true},{"objectId":8,"success":true}]}"#;

        assert_eq!(count_added(&response(body), 2).expect("all added"), 2);
        assert!(check_delete(&response(r#"{"success":true}"#)).is_ok());
    }

    #[test]
    fn registry_binds_configured_layers() {
        let config: FeatureServiceConfig = serde_json::from_value(json!({
            "layers": {
                "facilities": "https://example.test/FeatureServer/0/",
                "counties": "https://example.test/FeatureServer/1",
            }
        }))
        .expect("valid config");

        let registry = registry(&Client::new(), &config);

        assert_eq!(registry.layers(), vec![LayerId::Facilities, LayerId::Counties]);
        let sink = registry.sink(LayerId::Facilities).expect("bound");
        assert_eq!(sink.describe(), "https://example.test/FeatureServer/0");
        assert!(registry.sink(LayerId::Statewide).is_err());
    }
}
