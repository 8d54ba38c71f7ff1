//! Translation between adapter state and the visualization wire format
//!
//! Outbound, a schema plus a row window becomes an [`ExplorerPayload`].
//! Inbound, a cursor plus a [`UiRequest`] becomes a [`WindowRequest`] the
//! Row Windower can run. Both directions are pure.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use dx_core::{Cardinality, Column, FilterClause, Record, RowWindow, Schema, SemanticType, SortKey};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::AdapterConfig;
use crate::windower::WindowRequest;
use crate::AdapterError;

/// Column as the visualization layer sees it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireColumn {
    pub name: String,
    #[serde(rename = "type")]
    pub semantic_type: SemanticType,
    pub nullable: bool,
    pub cardinality: Cardinality,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl From<&Column> for WireColumn {
    fn from(column: &Column) -> Self {
        Self {
            name: column.name.clone(),
            semantic_type: column.semantic_type,
            nullable: column.nullable,
            cardinality: column.cardinality,
            title: column.title.clone(),
        }
    }
}

/// Ready-to-render payload handed to the Host Portal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExplorerPayload {
    pub schema: Vec<WireColumn>,
    pub rows: Vec<Record>,
    pub cursor: String,
    pub offset: usize,
    pub total_known: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_count: Option<usize>,
    pub filtered_count_known: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filtered_count: Option<usize>,
    pub has_more: bool,
}

/// A follow-up interaction from the visualization layer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UiRequest {
    /// Absent: continue after the cursor's window, or restart when the query changed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<usize>,
    /// Zero selects the configured default window
    #[serde(default)]
    pub limit: usize,
    /// Absent: keep the cursor's filter. Present: replace it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<Vec<FilterClause>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort: Option<Vec<SortKey>>,
}

impl UiRequest {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            ..Default::default()
        }
    }

    pub fn at(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn with_filter(mut self, filter: Vec<FilterClause>) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_sort(mut self, sort: Vec<SortKey>) -> Self {
        self.sort = Some(sort);
        self
    }
}

/// Decoded pagination token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cursor {
    pub session: Uuid,
    /// Schema epoch the token was issued under
    pub epoch: u64,
    pub offset: usize,
    pub next_offset: usize,
    #[serde(default)]
    pub filter: Vec<FilterClause>,
    #[serde(default)]
    pub sort: Vec<SortKey>,
}

impl Cursor {
    /// Cursor describing `window`, fetched for `request`
    pub fn for_window(session: Uuid, epoch: u64, request: &WindowRequest, window: &RowWindow) -> Self {
        Self {
            session,
            epoch,
            offset: window.offset,
            next_offset: window.next_offset(),
            filter: request.filter.clone(),
            sort: request.sort.clone(),
        }
    }

    /// Opaque token: URL-safe base64 of the JSON form
    pub fn encode(&self) -> Result<String, AdapterError> {
        let json = serde_json::to_vec(self)?;
        Ok(URL_SAFE_NO_PAD.encode(json))
    }

    pub fn decode(token: &str) -> Result<Self, AdapterError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(token.trim())
            .map_err(|_| AdapterError::InvalidCursor("token is not valid base64".to_string()))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| AdapterError::InvalidCursor(format!("malformed token: {}", e)))
    }
}

/// Converts between adapter state and wire messages
#[derive(Debug, Clone)]
pub struct ViewStateAdapter {
    default_window: usize,
    max_window: usize,
}

impl ViewStateAdapter {
    pub fn new(default_window: usize, max_window: usize) -> Self {
        Self {
            default_window,
            max_window: max_window.max(1),
        }
    }

    pub fn from_config(config: &AdapterConfig) -> Self {
        Self::new(config.default_window, config.max_window)
    }

    /// First window of a freshly opened session
    pub fn initial_request(&self) -> WindowRequest {
        WindowRequest::new(0, self.clamp_limit(0))
    }

    /// Package schema and window; column and row order are kept as given
    pub fn to_wire_payload(
        &self,
        schema: &Schema,
        window: &RowWindow,
        cursor: &Cursor,
    ) -> Result<ExplorerPayload, AdapterError> {
        Ok(ExplorerPayload {
            schema: schema.columns().iter().map(WireColumn::from).collect(),
            rows: window.rows.clone(),
            cursor: cursor.encode()?,
            offset: window.offset,
            total_known: window.total_known,
            total_count: window.total_count,
            filtered_count_known: window.filtered_count.is_some(),
            filtered_count: window.filtered_count,
            has_more: window.has_more,
        })
    }

    /// Turn a UI interaction into a store query
    ///
    /// Fields named by the request itself must exist in `schema`
    /// ([`AdapterError::UnknownField`]). Clauses inherited from the cursor
    /// that no longer fit the schema mean the cursor is stale
    /// ([`AdapterError::InvalidCursor`]).
    pub fn from_interaction(
        &self,
        schema: &Schema,
        cursor: &Cursor,
        request: &UiRequest,
    ) -> Result<WindowRequest, AdapterError> {
        let filter = match &request.filter {
            Some(filter) => {
                check_fields(schema, filter.iter().map(|c| c.field.as_str()))
                    .map_err(AdapterError::UnknownField)?;
                filter.clone()
            }
            None => {
                check_fields(schema, cursor.filter.iter().map(|c| c.field.as_str())).map_err(
                    |field| AdapterError::InvalidCursor(format!("cursor filters on unknown field '{}'", field)),
                )?;
                cursor.filter.clone()
            }
        };

        let sort = match &request.sort {
            Some(sort) => {
                check_fields(schema, sort.iter().map(|k| k.field.as_str()))
                    .map_err(AdapterError::UnknownField)?;
                sort.clone()
            }
            None => {
                check_fields(schema, cursor.sort.iter().map(|k| k.field.as_str())).map_err(
                    |field| AdapterError::InvalidCursor(format!("cursor sorts on unknown field '{}'", field)),
                )?;
                cursor.sort.clone()
            }
        };

        let offset = request.offset.unwrap_or_else(|| {
            if filter == cursor.filter && sort == cursor.sort {
                cursor.next_offset
            } else {
                0
            }
        });

        Ok(WindowRequest {
            offset,
            limit: self.clamp_limit(request.limit),
            filter,
            sort,
        })
    }

    fn clamp_limit(&self, limit: usize) -> usize {
        let limit = if limit == 0 { self.default_window } else { limit };
        limit.min(self.max_window)
    }
}

/// First field not present in the schema
fn check_fields<'a>(schema: &Schema, mut fields: impl Iterator<Item = &'a str>) -> Result<(), String> {
    match fields.find(|field| !schema.contains(field)) {
        Some(field) => Err(field.to_string()),
        None => Ok(()),
    }
}
