use course_core::{CacheSnapshot, Course, CourseCache, Instructor, JsonFileStore, MemoryStore};

fn course(id: i64) -> Course {
    Course {
        id,
        title: format!("Course {id}"),
        description: "A course".into(),
        thumbnail_url: format!("https://img/{id}.png"),
        price: 19.0,
        instructor: Instructor {
            name: "Edsger Dijkstra".into(),
            avatar_url: "https://avatar/ed.jpg".into(),
        },
        is_bookmarked: false,
    }
}

#[tokio::test]
async fn state_survives_reopen_from_disk() {
    let dir = tempfile::tempdir().unwrap();

    let mut cache = CourseCache::open(JsonFileStore::in_dir(dir.path())).await;
    cache.replace_catalog(vec![course(1), course(2)]);
    cache.toggle_bookmark(2);
    cache.enroll_course(1);
    cache.close().await;

    let reopened = CourseCache::open(JsonFileStore::in_dir(dir.path())).await;
    assert_eq!(reopened.bookmarks(), &[2]);
    assert!(reopened.is_enrolled(1));
    assert_eq!(reopened.courses().len(), 2);
    assert!(reopened.course_by_id(2).unwrap().is_bookmarked);
    reopened.close().await;
}

#[tokio::test]
async fn corrupt_snapshot_falls_back_to_tmp_copy() {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonFileStore::in_dir(dir.path());
    tokio::fs::write(store.path(), b"{ not json").await.unwrap();
    let fallback = CacheSnapshot {
        bookmarks: vec![4],
        enrolled_courses: vec![],
        courses: vec![],
    };
    tokio::fs::write(
        store.path().with_extension("json.tmp"),
        serde_json::to_vec(&fallback).unwrap(),
    )
    .await
    .unwrap();

    let cache = CourseCache::open(store).await;
    assert_eq!(cache.bookmarks(), &[4]);
}

#[tokio::test]
async fn unreadable_snapshot_starts_empty() {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonFileStore::in_dir(dir.path());
    tokio::fs::write(store.path(), b"garbage").await.unwrap();

    let cache = CourseCache::open(store).await;
    assert!(cache.courses().is_empty());
    assert!(cache.bookmarks().is_empty());
}

#[tokio::test]
async fn latest_mutation_is_what_gets_persisted() {
    let store = MemoryStore::new();
    let mut cache = CourseCache::open(store.clone()).await;
    cache.replace_catalog(vec![course(1), course(2), course(3)]);
    for id in [1, 2, 3, 2] {
        cache.toggle_bookmark(id);
    }
    cache.enroll_course(3);
    cache.flush().await;

    let saved = store.current().await.unwrap();
    assert_eq!(saved, cache.snapshot());
    assert_eq!(saved.bookmarks, vec![1, 3]);
    assert_eq!(saved.enrolled_courses, vec![3]);
}

#[tokio::test]
async fn repeated_enroll_does_not_write_again() {
    let store = MemoryStore::new();
    let mut cache = CourseCache::open(store.clone()).await;
    cache.enroll_course(3);
    cache.flush().await;
    let writes = store.save_count();

    cache.enroll_course(3);
    cache.flush().await;
    assert_eq!(store.save_count(), writes);
}

#[tokio::test]
async fn write_failures_are_reported_not_raised() {
    let store = MemoryStore::new();
    store.set_fail_writes(true);
    let mut cache = CourseCache::open(store.clone()).await;

    cache.toggle_bookmark(9);
    assert!(cache.is_bookmarked(9));
    cache.flush().await;
    let failure = cache.last_persist_error().expect("failure recorded");
    assert!(failure.message.contains("fail"));
    assert!(store.current().await.is_none());

    store.set_fail_writes(false);
    cache.enroll_course(1);
    cache.flush().await;
    assert!(cache.last_persist_error().is_none());
    assert_eq!(store.current().await.unwrap().bookmarks, vec![9]);
}

#[tokio::test]
async fn error_watch_sees_failures() {
    let store = MemoryStore::new();
    store.set_fail_writes(true);
    let mut cache = CourseCache::open(store).await;
    let mut errors = cache.persist_errors();

    cache.enroll_course(2);
    let failure = tokio::time::timeout(
        std::time::Duration::from_secs(2),
        errors.wait_for(|e| e.is_some()),
    )
    .await
    .expect("timed out")
    .expect("writer alive")
    .clone();
    assert_eq!(failure.map(|f| f.generation), Some(1));
}
