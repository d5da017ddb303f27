//! Catalog client contracts: read-only (path, version) -> playbook lookup.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CatalogResourceRequest {
    pub path: String,
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CatalogResourceResponse {
    pub path: String,
    pub version: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CatalogEntry {
    pub resource_path: String,
    pub resource_version: String,
    pub content: String,
}
