use serde::{Deserialize, Serialize};

use crate::openai::list_response_items::types::{ItemResource, ResponseItemListObjectType};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ListInputItemsResponse {
    pub object: ResponseItemListObjectType,
    pub data: Vec<ItemResource>,
    pub first_id: String,
    pub last_id: String,
    pub has_more: bool,
}
