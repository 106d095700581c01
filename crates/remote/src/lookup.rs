use std::collections::BTreeMap;

use parcels::normalize::RawParcel;
use serde_json::{Map, Value};

use crate::{BoxFuture, RemoteError};

/// Cadastral lookup proxy: resolves a free-text query (address, jibun) to parcels.
pub trait ParcelLookup: Send + Sync {
    fn lookup<'a>(&'a self, query: &'a str) -> BoxFuture<'a, Result<Vec<RawParcel>, RemoteError>>;
}

/// HTTP proxy client. The endpoint receives `?query=` and answers with either
/// a JSON array of parcel rows or a GeoJSON `FeatureCollection`.
pub struct HttpLookup {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpLookup {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            client: reqwest::Client::new(),
        }
    }
}

impl ParcelLookup for HttpLookup {
    fn lookup<'a>(&'a self, query: &'a str) -> BoxFuture<'a, Result<Vec<RawParcel>, RemoteError>> {
        Box::pin(async move {
            let resp = self
                .client
                .get(&self.endpoint)
                .query(&[("query", query)])
                .send()
                .await?;
            let status = resp.status();
            if !status.is_success() {
                return Err(RemoteError::Status {
                    status: status.as_u16(),
                    body: resp.text().await.unwrap_or_default(),
                });
            }
            let body: Value = resp.json().await?;
            Ok(rows_from_response(body))
        })
    }
}

/// Fixed query → rows table.
#[derive(Debug, Default)]
pub struct StaticLookup {
    results: BTreeMap<String, Vec<RawParcel>>,
}

impl StaticLookup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_result(mut self, query: impl Into<String>, rows: Vec<RawParcel>) -> Self {
        self.results.insert(query.into(), rows);
        self
    }
}

impl ParcelLookup for StaticLookup {
    fn lookup<'a>(&'a self, query: &'a str) -> BoxFuture<'a, Result<Vec<RawParcel>, RemoteError>> {
        Box::pin(async move { Ok(self.results.get(query.trim()).cloned().unwrap_or_default()) })
    }
}

/// Flattens a proxy response into raw rows.
///
/// GeoJSON features contribute their `properties` with the feature geometry
/// attached under `geometry`.
pub fn rows_from_response(body: Value) -> Vec<RawParcel> {
    match body {
        Value::Array(items) => items.into_iter().filter_map(RawParcel::from_value).collect(),
        Value::Object(mut obj) => match obj.remove("features") {
            Some(Value::Array(features)) => features.into_iter().filter_map(feature_row).collect(),
            _ => RawParcel::from_value(Value::Object(obj)).into_iter().collect(),
        },
        _ => Vec::new(),
    }
}

fn feature_row(feature: Value) -> Option<RawParcel> {
    let Value::Object(mut feature) = feature else {
        return None;
    };
    let mut props = match feature.remove("properties") {
        Some(Value::Object(p)) => p,
        _ => Map::new(),
    };
    if let Some(geometry) = feature.remove("geometry") {
        props.insert("geometry".to_string(), geometry);
    }
    if !props.contains_key("pnu")
        && let Some(id) = feature.remove("id")
    {
        props.insert("pnu".to_string(), id);
    }
    Some(RawParcel(props))
}

#[cfg(test)]
mod tests {
    use super::{ParcelLookup, StaticLookup, rows_from_response};
    use parcels::normalize::{RawParcel, normalize};
    use serde_json::json;

    #[test]
    fn feature_collection_rows_carry_geometry_and_id() {
        let rows = rows_from_response(json!({
            "type": "FeatureCollection",
            "features": [{
                "type": "Feature",
                "id": "1111010100100010000",
                "properties": { "addr": "서울특별시 종로구 세종로 1" },
                "geometry": { "type": "Polygon", "coordinates": [[[126.97, 37.57], [126.98, 37.57], [126.98, 37.58]]] }
            }]
        }));
        assert_eq!(rows.len(), 1);
        let rec = normalize(&rows[0]).unwrap();
        assert_eq!(rec.pnu.as_str(), "1111010100100010000");
        assert_eq!(rec.address, "서울특별시 종로구 세종로 1");
        assert!(rec.has_geometry());
    }

    #[test]
    fn plain_arrays_pass_through() {
        let rows = rows_from_response(json!([{ "pnu": "a" }, 3, { "pnu": "b" }]));
        assert_eq!(rows.len(), 2);
        assert!(rows_from_response(json!("nope")).is_empty());
    }

    #[tokio::test]
    async fn static_lookup_answers_known_queries() {
        let row = RawParcel::from_value(json!({ "pnu": "PNU-C" })).unwrap();
        let lookup = StaticLookup::new().with_result("세종로", vec![row]);
        assert_eq!(lookup.lookup(" 세종로 ").await.unwrap().len(), 1);
        assert!(lookup.lookup("없는 주소").await.unwrap().is_empty());
    }
}
