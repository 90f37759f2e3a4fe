//! Core data models used throughout reelvec.
//!
//! These types represent the catalog records, enriched documents, and search
//! hits that flow through the ingestion and query paths.

use serde::{Deserialize, Deserializer, Serialize};

/// A movie record as read from the source catalog (JSON array element).
///
/// Immutable once read. Unknown fields in the input are ignored.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct RawRecord {
    #[serde(deserialize_with = "id_from_number_or_string")]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub poster_path: Option<String>,
    #[serde(default)]
    pub backdrop_path: Option<String>,
    #[serde(default)]
    pub overview: Option<String>,
    #[serde(default)]
    pub release_date: Option<String>,
    #[serde(default)]
    pub popularity: Option<f64>,
    #[serde(default)]
    pub imdb_id: Option<String>,
}

fn id_from_number_or_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Int(i64),
        Float(f64),
        Text(String),
    }

    Ok(match Id::deserialize(deserializer)? {
        Id::Int(n) => n.to_string(),
        Id::Float(f) => f.to_string(),
        Id::Text(s) => s,
    })
}

/// The stored unit: source fields plus embeddings and their provenance.
///
/// Written once per successfully processed record; keyed by `id`.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct EnrichedDocument {
    pub id: String,
    pub title: String,
    pub release_date: Option<String>,
    pub popularity: Option<f64>,
    pub imdb_id: Option<String>,
    pub overview: Option<String>,
    pub poster_path: Option<String>,
    pub backdrop_path: Option<String>,
    /// Name of the model that produced both embeddings.
    pub embedding_model: String,
    pub image_embedding: Vec<f32>,
    /// Absent when the record had no text to embed alongside the image.
    pub text_embedding: Option<Vec<f32>>,
}

impl EnrichedDocument {
    pub fn from_record(
        record: &RawRecord,
        embedding_model: &str,
        image_embedding: Vec<f32>,
        text_embedding: Option<Vec<f32>>,
    ) -> Self {
        Self {
            id: record.id.clone(),
            title: record.title.clone(),
            release_date: record.release_date.clone(),
            popularity: record.popularity,
            imdb_id: record.imdb_id.clone(),
            overview: record.overview.clone(),
            poster_path: record.poster_path.clone(),
            backdrop_path: record.backdrop_path.clone(),
            embedding_model: embedding_model.to_string(),
            image_embedding,
            text_embedding,
        }
    }

    /// Vector stored under an index field name.
    pub fn vector_field(&self, field: &str) -> Option<&[f32]> {
        match field {
            "image_embedding" => Some(&self.image_embedding),
            "text_embedding" => self.text_embedding.as_deref(),
            _ => None,
        }
    }
}

/// One vector search result, in index order.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SearchHit {
    pub id: String,
    pub title: String,
    pub poster_path: Option<String>,
    pub score: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_numeric_and_string_ids() {
        let records: Vec<RawRecord> = serde_json::from_str(
            r#"[{"id": 1, "title": "Nova"}, {"id": "tt-2", "title": "Other", "adult": false}]"#,
        )
        .unwrap();
        assert_eq!(records[0].id, "1");
        assert_eq!(records[1].id, "tt-2");
        assert!(records[0].poster_path.is_none());
        assert!(records[0].overview.is_none());
    }

    #[test]
    fn parses_full_tmdb_shape() {
        let record: RawRecord = serde_json::from_str(
            r#"{
                "id": 872585,
                "title": "Oppenheimer",
                "poster_path": "https://image.tmdb.org/t/p/original/abc.jpg",
                "backdrop_path": null,
                "overview": "The story of J. Robert Oppenheimer.",
                "release_date": "2023-07-19",
                "popularity": 215.6,
                "imdb_id": "tt15398776",
                "genres": [{"id": 18, "name": "Drama"}]
            }"#,
        )
        .unwrap();
        assert_eq!(record.id, "872585");
        assert_eq!(record.imdb_id.as_deref(), Some("tt15398776"));
        assert!(record.backdrop_path.is_none());
        assert_eq!(record.popularity, Some(215.6));
    }

    #[test]
    fn vector_field_lookup() {
        let record: RawRecord = serde_json::from_str(r#"{"id": 1, "title": "Nova"}"#).unwrap();
        let doc = EnrichedDocument::from_record(&record, "m", vec![1.0], Some(vec![2.0]));
        assert_eq!(doc.vector_field("image_embedding"), Some(&[1.0f32][..]));
        assert_eq!(doc.vector_field("text_embedding"), Some(&[2.0f32][..]));
        assert!(doc.vector_field("title").is_none());
    }
}
