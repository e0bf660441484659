//! Remote record shapes of the public demo API and the mapping into [`Course`].

use serde::{Deserialize, Serialize};

use crate::course::{Course, CourseId, Instructor};
use crate::error::CatalogError;

/// Outer envelope: `{ "statusCode": .., "data": { "data": [..], "page": .. }, "success": .. }`.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiEnvelope<T> {
    pub data: T,
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub data: Vec<T>,
    #[serde(default)]
    pub page: Option<u32>,
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default)]
    pub total_pages: Option<u32>,
    #[serde(default)]
    pub next_page: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RemoteProduct {
    pub id: CourseId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub thumbnail: String,
    #[serde(default)]
    pub price: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PersonName {
    pub first: String,
    pub last: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Picture {
    pub medium: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RemoteUser {
    pub name: PersonName,
    pub picture: Picture,
}

impl RemoteUser {
    pub fn to_instructor(&self) -> Instructor {
        Instructor {
            name: format!("{} {}", self.name.first, self.name.last),
            avatar_url: self.picture.medium.clone(),
        }
    }
}

impl Course {
    pub fn from_remote(product: &RemoteProduct, instructor: Instructor) -> Self {
        Self {
            id: product.id,
            title: product.title.clone(),
            description: product.description.clone(),
            thumbnail_url: product.thumbnail.clone(),
            price: product.price.max(0.0),
            instructor,
            is_bookmarked: false,
        }
    }
}

/// Pairs product `i` with user `i % users.len()`.
///
/// The pairing depends only on list order, so the same two pages always
/// produce the same catalog.
pub fn build_courses(
    products: &[RemoteProduct],
    users: &[RemoteUser],
) -> Result<Vec<Course>, CatalogError> {
    if products.is_empty() {
        return Ok(Vec::new());
    }
    if users.is_empty() {
        return Err(CatalogError::NoInstructors {
            products: products.len(),
        });
    }

    let instructors: Vec<Instructor> = users.iter().map(RemoteUser::to_instructor).collect();
    Ok(products
        .iter()
        .enumerate()
        .map(|(index, product)| {
            Course::from_remote(product, instructors[index % instructors.len()].clone())
        })
        .collect())
}
