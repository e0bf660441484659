use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{watch, RwLock};
use tracing::{debug, info, warn};

use crate::course::{Course, CourseId};
use crate::persist::{PersistFailure, PersistWriter};
use crate::store::{CacheSnapshot, SnapshotStore};

pub type SharedCourseCache = Arc<RwLock<CourseCache>>;

pub fn shared_cache(cache: CourseCache) -> SharedCourseCache {
    Arc::new(RwLock::new(cache))
}

/// Counts shown on the profile screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    pub courses: usize,
    pub bookmarks: usize,
    pub enrolled: usize,
}

/// Catalog view plus the user's bookmark and enrollment sets.
///
/// `bookmarks` is authoritative: every course's `is_bookmarked` is rebuilt
/// from it whenever either side changes. Memberships are independent of
/// the catalog, so a bookmark survives a refresh that drops its course.
///
/// Every mutation applies in memory first and then hands a snapshot to the
/// background writer; callers never wait on storage.
pub struct CourseCache {
    courses: Vec<Course>,
    bookmarks: Vec<CourseId>,
    enrolled: Vec<CourseId>,
    writer: PersistWriter,
}

impl CourseCache {
    /// Hydrates from `store` before returning, so no mutation can race the
    /// initial read. A failed read starts the cache empty.
    pub async fn open<S>(store: S) -> Self
    where
        S: SnapshotStore + 'static,
    {
        let store: Arc<dyn SnapshotStore> = Arc::new(store);
        let snapshot = match store.load().await {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => {
                debug!("no persisted course state, starting empty");
                CacheSnapshot::default()
            }
            Err(err) => {
                warn!(error = %err, "failed to load persisted course state, starting empty");
                CacheSnapshot::default()
            }
        };

        let mut cache = Self {
            courses: Vec::new(),
            bookmarks: dedup_ids(snapshot.bookmarks),
            enrolled: dedup_ids(snapshot.enrolled_courses),
            writer: PersistWriter::spawn(store),
        };
        cache.courses = cache.derive_catalog(snapshot.courses);
        info!(
            courses = cache.courses.len(),
            bookmarks = cache.bookmarks.len(),
            enrolled = cache.enrolled.len(),
            "course cache ready"
        );
        cache
    }

    /// Replaces the whole catalog, keeping the incoming order. Incoming
    /// bookmark flags are ignored and rebuilt from the bookmark set.
    pub fn replace_catalog(&mut self, new_courses: Vec<Course>) {
        self.courses = self.derive_catalog(new_courses);
        debug!(courses = self.courses.len(), "catalog replaced");
        self.persist();
    }

    pub fn toggle_bookmark(&mut self, course_id: CourseId) {
        let now_bookmarked = match self.bookmarks.iter().position(|id| *id == course_id) {
            Some(pos) => {
                self.bookmarks.remove(pos);
                false
            }
            None => {
                self.bookmarks.push(course_id);
                true
            }
        };
        for course in self.courses.iter_mut().filter(|c| c.id == course_id) {
            course.is_bookmarked = now_bookmarked;
        }
        debug!(course_id, bookmarked = now_bookmarked, "bookmark toggled");
        self.persist();
    }

    /// Enrollment is permanent; enrolling twice is a no-op.
    pub fn enroll_course(&mut self, course_id: CourseId) {
        if self.enrolled.contains(&course_id) {
            debug!(course_id, "already enrolled");
            return;
        }
        self.enrolled.push(course_id);
        info!(course_id, "enrolled in course");
        self.persist();
    }

    pub fn is_enrolled(&self, course_id: CourseId) -> bool {
        self.enrolled.contains(&course_id)
    }

    pub fn is_bookmarked(&self, course_id: CourseId) -> bool {
        self.bookmarks.contains(&course_id)
    }

    pub fn course_by_id(&self, id: CourseId) -> Option<&Course> {
        self.courses.iter().find(|c| c.id == id)
    }

    pub fn courses(&self) -> &[Course] {
        &self.courses
    }

    pub fn bookmarks(&self) -> &[CourseId] {
        &self.bookmarks
    }

    pub fn enrolled_course_ids(&self) -> &[CourseId] {
        &self.enrolled
    }

    pub fn bookmarked_courses(&self) -> Vec<&Course> {
        self.courses.iter().filter(|c| c.is_bookmarked).collect()
    }

    pub fn enrolled_courses(&self) -> Vec<&Course> {
        self.courses
            .iter()
            .filter(|c| self.enrolled.contains(&c.id))
            .collect()
    }

    pub fn search(&self, query: &str) -> Vec<&Course> {
        self.courses.iter().filter(|c| c.matches(query)).collect()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            courses: self.courses.len(),
            bookmarks: self.bookmarks.len(),
            enrolled: self.enrolled.len(),
        }
    }

    pub fn snapshot(&self) -> CacheSnapshot {
        CacheSnapshot {
            bookmarks: self.bookmarks.clone(),
            enrolled_courses: self.enrolled.clone(),
            courses: self.courses.clone(),
        }
    }

    /// Cleared again by the next successful write.
    pub fn last_persist_error(&self) -> Option<PersistFailure> {
        self.writer.last_error()
    }

    pub fn persist_errors(&self) -> watch::Receiver<Option<PersistFailure>> {
        self.writer.errors()
    }

    pub async fn flush(&self) {
        self.writer.flush().await;
    }

    /// Flushes pending state and stops the background writer.
    pub async fn close(self) {
        if let Err(err) = self.writer.stop().await {
            warn!(error = %err, "snapshot writer task failed");
        }
    }

    fn persist(&mut self) {
        let snapshot = self.snapshot();
        self.writer.publish(snapshot);
    }

    /// Bookmark flags from the set; a repeated id keeps its first position
    /// and takes the last record.
    fn derive_catalog(&self, incoming: Vec<Course>) -> Vec<Course> {
        let mut positions: HashMap<CourseId, usize> = HashMap::with_capacity(incoming.len());
        let mut courses: Vec<Course> = Vec::with_capacity(incoming.len());
        for mut course in incoming {
            course.is_bookmarked = self.bookmarks.contains(&course.id);
            match positions.get(&course.id) {
                Some(&pos) => courses[pos] = course,
                None => {
                    positions.insert(course.id, courses.len());
                    courses.push(course);
                }
            }
        }
        courses
    }
}

fn dedup_ids(ids: Vec<CourseId>) -> Vec<CourseId> {
    let mut out = Vec::with_capacity(ids.len());
    for id in ids {
        if !out.contains(&id) {
            out.push(id);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::course::Instructor;
    use crate::store::MemoryStore;

    fn course(id: CourseId) -> Course {
        Course {
            id,
            title: format!("Course {id}"),
            description: String::new(),
            thumbnail_url: String::new(),
            price: 9.99,
            instructor: Instructor {
                name: "Grace Hopper".into(),
                avatar_url: String::new(),
            },
            is_bookmarked: false,
        }
    }

    fn assert_flags_match(cache: &CourseCache) {
        for c in cache.courses() {
            assert_eq!(c.is_bookmarked, cache.is_bookmarked(c.id), "course {}", c.id);
        }
    }

    #[tokio::test]
    async fn double_toggle_restores_state() {
        let mut cache = CourseCache::open(MemoryStore::new()).await;
        cache.replace_catalog(vec![course(1), course(2)]);
        cache.toggle_bookmark(2);
        let before = (cache.bookmarks().to_vec(), cache.courses().to_vec());

        for id in [1, 2, 77] {
            cache.toggle_bookmark(id);
            cache.toggle_bookmark(id);
            assert_eq!(cache.bookmarks(), before.0.as_slice());
            assert_eq!(cache.courses(), before.1.as_slice());
        }
    }

    #[tokio::test]
    async fn bookmark_survives_refresh() {
        let store = MemoryStore::with_snapshot(CacheSnapshot {
            bookmarks: vec![5],
            ..CacheSnapshot::default()
        });
        let mut cache = CourseCache::open(store).await;
        cache.replace_catalog(vec![course(5), course(7)]);

        assert!(cache.course_by_id(5).unwrap().is_bookmarked);
        assert!(!cache.course_by_id(7).unwrap().is_bookmarked);
    }

    #[tokio::test]
    async fn incoming_bookmark_flags_are_ignored() {
        let mut cache = CourseCache::open(MemoryStore::new()).await;
        let mut spoofed = course(3);
        spoofed.is_bookmarked = true;
        cache.replace_catalog(vec![spoofed]);
        assert!(!cache.course_by_id(3).unwrap().is_bookmarked);
    }

    #[tokio::test]
    async fn flags_track_bookmarks_through_mixed_operations() {
        let mut cache = CourseCache::open(MemoryStore::new()).await;
        cache.replace_catalog(vec![course(1), course(2), course(3)]);
        cache.toggle_bookmark(2);
        assert_flags_match(&cache);
        cache.toggle_bookmark(4);
        cache.replace_catalog(vec![course(4), course(2)]);
        assert_flags_match(&cache);
        cache.toggle_bookmark(2);
        cache.replace_catalog(vec![course(1), course(2), course(4)]);
        assert_flags_match(&cache);
        assert_eq!(cache.bookmarks(), &[4]);
    }

    #[tokio::test]
    async fn bookmark_outlives_its_course() {
        let mut cache = CourseCache::open(MemoryStore::new()).await;
        cache.replace_catalog(vec![course(1)]);
        cache.toggle_bookmark(1);
        cache.replace_catalog(vec![course(2)]);
        assert!(cache.is_bookmarked(1));
        assert!(cache.bookmarked_courses().is_empty());

        cache.replace_catalog(vec![course(1), course(2)]);
        assert_eq!(cache.bookmarked_courses().len(), 1);
    }

    #[tokio::test]
    async fn enroll_is_idempotent() {
        let mut cache = CourseCache::open(MemoryStore::new()).await;
        cache.enroll_course(3);
        cache.enroll_course(3);
        assert_eq!(cache.enrolled_course_ids(), &[3]);
        assert!(cache.is_enrolled(3));
        assert!(!cache.is_enrolled(4));
    }

    #[tokio::test]
    async fn missing_course_is_none() {
        let cache = CourseCache::open(MemoryStore::new()).await;
        assert!(cache.course_by_id(999).is_none());
    }

    #[tokio::test]
    async fn replace_preserves_order_and_dedups_by_id() {
        let mut cache = CourseCache::open(MemoryStore::new()).await;
        cache.replace_catalog(vec![course(9), course(1), course(5)]);
        let ids: Vec<_> = cache.courses().iter().map(|c| c.id).collect();
        assert_eq!(ids, [9, 1, 5]);

        let mut newer = course(1);
        newer.title = "Renamed".into();
        cache.replace_catalog(vec![course(1), course(2), newer]);
        let ids: Vec<_> = cache.courses().iter().map(|c| c.id).collect();
        assert_eq!(ids, [1, 2]);
        assert_eq!(cache.course_by_id(1).unwrap().title, "Renamed");

        cache.replace_catalog(Vec::new());
        assert!(cache.courses().is_empty());
    }

    #[tokio::test]
    async fn hydration_repairs_tampered_snapshot() {
        let mut tampered = course(8);
        tampered.is_bookmarked = true;
        let store = MemoryStore::with_snapshot(CacheSnapshot {
            bookmarks: vec![1, 1, 2],
            enrolled_courses: vec![6, 6],
            courses: vec![course(1), tampered],
        });
        let cache = CourseCache::open(store).await;
        assert_eq!(cache.bookmarks(), &[1, 2]);
        assert_eq!(cache.enrolled_course_ids(), &[6]);
        assert_flags_match(&cache);
    }

    #[tokio::test]
    async fn shared_cache_serves_concurrent_readers() {
        let shared = shared_cache(CourseCache::open(MemoryStore::new()).await);
        shared.write().await.replace_catalog(vec![course(1)]);

        let reader = Arc::clone(&shared);
        let found = tokio::spawn(async move { reader.read().await.course_by_id(1).is_some() })
            .await
            .unwrap();
        assert!(found);
    }

    #[tokio::test]
    async fn filters_and_stats() {
        let mut cache = CourseCache::open(MemoryStore::new()).await;
        let mut other = course(2);
        other.instructor.name = "Alan Turing".into();
        cache.replace_catalog(vec![course(1), other, course(3)]);
        cache.toggle_bookmark(3);
        cache.enroll_course(1);
        cache.enroll_course(42);

        assert_eq!(cache.search("turing").len(), 1);
        assert_eq!(cache.search("").len(), 3);
        assert_eq!(cache.enrolled_courses()[0].id, 1);
        assert_eq!(cache.bookmarked_courses()[0].id, 3);
        assert_eq!(
            cache.stats(),
            CacheStats {
                courses: 3,
                bookmarks: 1,
                enrolled: 2
            }
        );
    }
}
