use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SortDirection {
	#[serde(rename = "asc")]
	Ascending,
	#[default]
	#[serde(rename = "desc")]
	Descending,
}

impl SortDirection {
	pub const fn as_str(self) -> &'static str {
		match self {
			SortDirection::Ascending => "asc",
			SortDirection::Descending => "desc",
		}
	}
}

/// Paginated list request. Pages are 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageRequest {
	pub page: u32,
	pub page_size: u32,
	pub sort_direction: SortDirection,
}

impl PageRequest {
	/// Most-recent-first request for `page`.
	pub fn newest_first(page: u32, page_size: u32) -> Self {
		Self {
			page: page.max(1),
			page_size,
			sort_direction: SortDirection::Descending,
		}
	}
}

/// One page of a paginated listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
	pub items: Vec<T>,
	pub total_items: u64,
	pub current_page: u32,
	pub page_size: u32,
	pub has_next_page: bool,
	pub has_previous_page: bool,
}

impl<T> Page<T> {
	/// First page holding exactly one item, as synthesized for a live event
	/// arriving before any fetch.
	pub fn single(item: T, page_size: u32) -> Self {
		Self {
			items: vec![item],
			total_items: 1,
			current_page: 1,
			page_size,
			has_next_page: false,
			has_previous_page: false,
		}
	}

	pub fn empty(page: u32, page_size: u32) -> Self {
		Self {
			items: Vec::new(),
			total_items: 0,
			current_page: page,
			page_size,
			has_next_page: false,
			has_previous_page: page > 1,
		}
	}
}
