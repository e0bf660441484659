use serde::{Deserialize, Serialize};

pub type CourseId = i64;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct Instructor {
    pub name: String,
    pub avatar_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Course {
    pub id: CourseId,
    pub title: String,
    pub description: String,
    pub thumbnail_url: String,
    pub price: f64,
    pub instructor: Instructor,
    /// Mirror of the cache's bookmark set. Whatever a caller puts here is
    /// overwritten when the course enters the cache.
    #[serde(default)]
    pub is_bookmarked: bool,
}

impl Course {
    /// Case-insensitive search on the title or the instructor name.
    pub fn matches(&self, query: &str) -> bool {
        let query = query.to_lowercase();
        if query.is_empty() {
            return true;
        }
        self.title.to_lowercase().contains(&query)
            || self.instructor.name.to_lowercase().contains(&query)
    }
}
