use serde::{Deserialize, Serialize};

/// Model catalog response. Two upstream shapes exist: the AI-Studio style
/// carries `models`, the Vertex publisher catalog carries `publisherModels`.
/// Both default to empty so an unexpected payload yields no entries instead
/// of a parse failure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogResponse {
    #[serde(default)]
    pub models: Vec<CatalogModel>,
    #[serde(default)]
    pub publisher_models: Vec<CatalogModel>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CatalogModel {
    #[serde(default)]
    pub name: String,
}
