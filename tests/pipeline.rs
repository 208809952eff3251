mod common;

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use facesearch::FaceError;
use facesearch::config::PipelineOptions;
use facesearch::ingest::{IngestMode, PhotoRef};
use facesearch::status::IngestionState;
use indicatif::ProgressBar;
use rstest::*;

use common::*;

const DIM: usize = 16;

#[fixture]
fn fetcher() -> FakeFetcher {
    let mut fetcher = FakeFetcher::default();
    for (i, id) in ["p1", "p2", "p3", "p4", "p5"].iter().enumerate() {
        fetcher.insert(&url(id), &[face(unit(DIM, i), 10.)]);
    }
    fetcher
}

#[rstest]
#[case(1)]
#[case(2)]
#[case(10)]
#[tokio::test]
async fn two_of_five_fetches_fail(fetcher: FakeFetcher, #[case] batch_size: usize) {
    let ts = service(fetcher, batch_size, false);
    let photos = vec![photo("p1"), photo("x1"), photo("p2"), photo("x2"), photo("p3")];

    let result = ts.service.ingest_full("album", photos, &ProgressBar::hidden()).await.unwrap();
    assert_eq!(result.processed, 3);
    assert_eq!(result.failed, 2);
    assert_eq!(result.faces_added, 3);
    assert_eq!(result.total_faces, 3);
    assert_eq!(result.mode, IngestMode::Full);

    let status = ts.service.get_status("album").await.unwrap();
    assert_eq!(status.state, IngestionState::Completed);
    assert_eq!(status.processed, 5);
    assert_eq!(status.total, 5);
    assert_eq!(status.faces, 3);
    assert_eq!(status.progress_percent, 100.);
}

#[rstest]
#[tokio::test]
async fn missing_url_counts_as_failed(fetcher: FakeFetcher) {
    let ts = service(fetcher, 10, false);
    let photos = vec![
        photo("p1"),
        PhotoRef { id: "nourl".to_string(), url: None },
        PhotoRef { id: "empty".to_string(), url: Some(String::new()) },
    ];
    let result = ts.service.ingest_full("album", photos, &ProgressBar::hidden()).await.unwrap();
    assert_eq!((result.processed, result.failed), (1, 2));
}

#[tokio::test]
async fn zero_faces_and_broken_images_count_as_failed() {
    let mut fetcher = FakeFetcher::default();
    fetcher.insert(&url("ok"), &[face(unit(DIM, 0), 10.)]);
    fetcher.insert(&url("noface"), &[]);
    fetcher.insert_raw(&url("broken"), b"broken");
    let ts = service(fetcher, 10, false);

    let photos = vec![photo("ok"), photo("noface"), photo("broken")];
    let result = ts.service.ingest_full("album", photos, &ProgressBar::hidden()).await.unwrap();
    assert_eq!((result.processed, result.failed, result.total_faces), (1, 2, 1));
}

#[tokio::test]
async fn multiple_faces_share_item_id() {
    let mut fetcher = FakeFetcher::default();
    let faces = [face(unit(DIM, 0), 10.), face(unit(DIM, 1), 20.), face(unit(DIM, 2), 5.)];
    fetcher.insert(&url("group"), &faces);
    let ts = service(fetcher, 10, true);

    let result =
        ts.service.ingest_full("album", vec![photo("group")], &ProgressBar::hidden()).await.unwrap();
    assert_eq!(result.processed, 1);
    assert_eq!(result.total_faces, 3);

    // 任意一张人脸都能找到这张图片
    for i in 0..3 {
        let r = ts.service.search("album", image(&[face(unit(DIM, i), 1.)]), None, false).await;
        let r = r.unwrap();
        assert!(r.matched_item_ids.contains("group"));
    }
}

#[rstest]
#[tokio::test]
async fn incremental_appends_to_corpus(fetcher: FakeFetcher) {
    let ts = service(fetcher, 2, false);
    let pb = ProgressBar::hidden();

    ts.service.ingest_full("album", vec![photo("p1"), photo("p2")], &pb).await.unwrap();
    let result =
        ts.service.ingest_incremental("album", vec![photo("p3"), photo("x")], &pb).await.unwrap();
    assert_eq!(result.mode, IngestMode::Incremental);
    assert_eq!(result.faces_added, 1);
    assert_eq!(result.total_faces, 3);
    assert_eq!(result.failed, 1);

    let r = ts.service.search("album", image(&[face(unit(DIM, 2), 1.)]), None, false).await.unwrap();
    assert_eq!(r.matched_item_ids.iter().collect::<Vec<_>>(), ["p3"]);
}

#[rstest]
#[tokio::test]
async fn incremental_into_absent_collection(fetcher: FakeFetcher) {
    let ts = service(fetcher, 10, false);
    let result = ts
        .service
        .ingest_incremental("fresh", vec![photo("p1")], &ProgressBar::hidden())
        .await
        .unwrap();
    assert_eq!(result.total_faces, 1);
    let status = ts.service.get_status("fresh").await.unwrap();
    assert_eq!(status.state, IngestionState::Completed);
}

#[rstest]
#[tokio::test]
async fn full_ingest_replaces_corpus(fetcher: FakeFetcher) {
    let ts = service(fetcher, 10, false);
    let pb = ProgressBar::hidden();
    ts.service.ingest_full("album", vec![photo("p1"), photo("p2")], &pb).await.unwrap();
    let result = ts.service.ingest_full("album", vec![photo("p3")], &pb).await.unwrap();
    assert_eq!(result.total_faces, 1);

    let r = ts.service.search("album", image(&[face(unit(DIM, 0), 1.)]), None, false).await.unwrap();
    assert!(r.matched_item_ids.is_empty());
}

#[rstest]
#[case("", vec![photo("p1")])]
#[case("album", vec![])]
#[case("../etc", vec![photo("p1")])]
#[tokio::test]
async fn invalid_requests(fetcher: FakeFetcher, #[case] id: &str, #[case] photos: Vec<PhotoRef>) {
    let ts = service(fetcher, 10, false);
    let err = ts.service.ingest_full(id, photos, &ProgressBar::hidden()).await.unwrap_err();
    assert!(matches!(err.downcast_ref::<FaceError>(), Some(FaceError::InvalidRequest(_))));
    // 不合法的请求不会留下任何文件
    assert!(!ts.dir.path().join("encodings").join("album.json").exists());
}

#[rstest]
#[tokio::test]
async fn remove_then_search(fetcher: FakeFetcher) {
    let ts = service(fetcher, 10, false);
    let pb = ProgressBar::hidden();
    ts.service.ingest_full("album", vec![photo("p1"), photo("p2")], &pb).await.unwrap();

    let removed = ts.service.remove_items("album", &["p1".to_string()]).await.unwrap();
    assert_eq!((removed.removed, removed.remaining), (1, 1));

    let r = ts.service.search("album", image(&[face(unit(DIM, 0), 1.)]), None, false).await.unwrap();
    assert!(r.matched_item_ids.is_empty());
    let r = ts.service.search("album", image(&[face(unit(DIM, 1), 1.)]), None, false).await.unwrap();
    assert!(r.matched_item_ids.contains("p2"));

    let err = ts.service.remove_items("album", &[]).await.unwrap_err();
    assert!(matches!(err.downcast_ref::<FaceError>(), Some(FaceError::InvalidRequest(_))));
}

#[rstest]
#[tokio::test]
async fn evict_reloads_from_disk(fetcher: FakeFetcher) {
    let ts = service(fetcher, 10, false);
    ts.service.ingest_full("album", vec![photo("p1")], &ProgressBar::hidden()).await.unwrap();
    assert_eq!(ts.service.health().cached_collections, vec!["album".to_string()]);

    assert!(ts.service.evict_cache("album"));
    assert!(!ts.service.evict_cache("album"));
    assert!(ts.service.health().cached_collections.is_empty());

    let r = ts.service.search("album", image(&[face(unit(DIM, 0), 1.)]), None, false).await.unwrap();
    assert!(r.matched_item_ids.contains("p1"));
}

#[tokio::test]
async fn detect_sorted_by_area() {
    let ts = service(FakeFetcher::default(), 10, false);
    let faces = [face(unit(DIM, 0), 10.), face(unit(DIM, 1), 30.), face(unit(DIM, 2), 20.)];
    let result = ts.service.detect_faces(image(&faces)).await.unwrap();
    assert_eq!(result.face_count, 3);
    assert!(result.has_face);
    let areas = result.faces.iter().map(|f| f.area).collect::<Vec<_>>();
    assert_eq!(areas, vec![900., 400., 100.]);

    let result = ts.service.detect_faces(image(&[])).await.unwrap();
    assert!(!result.has_face);
}

#[tokio::test]
async fn status_of_unknown_collection() {
    let ts = service(FakeFetcher::default(), 10, false);
    let status = ts.service.get_status("nothing").await.unwrap();
    assert_eq!(status.state, IngestionState::NotStarted);
    assert_eq!(status.progress_percent, 0.);
}

#[rstest]
#[tokio::test]
async fn slow_fetch_times_out_alone(mut fetcher: FakeFetcher) {
    fetcher.insert(&url("slow"), &[face(unit(DIM, 9), 10.)]);
    fetcher.delay(&url("slow"), Duration::from_secs(30));
    let pipeline = PipelineOptions { batch_size: 2, workers: 2, fetch_timeout: 1 };
    let ts = service_with(fetcher, pipeline, false);

    let start = Instant::now();
    let photos = vec![photo("slow"), photo("p1"), photo("p2")];
    let result = ts.service.ingest_full("album", photos, &ProgressBar::hidden()).await.unwrap();
    assert!(start.elapsed() < Duration::from_secs(10));
    assert_eq!((result.processed, result.failed, result.total_faces), (2, 1, 2));

    let r = ts.service.search("album", image(&[face(unit(DIM, 0), 1.)]), None, false).await.unwrap();
    assert!(r.matched_item_ids.contains("p1"));
}

#[rstest]
#[tokio::test]
async fn crashed_batch_counts_all_items_failed(mut fetcher: FakeFetcher) {
    fetcher.insert_raw(&url("crash"), b"panic");
    let ts = service(fetcher, 2, false);

    // 第一个批次中 p1 本身没有问题，但和崩溃的图片一起被计为失败
    let photos = vec![photo("p1"), photo("crash"), photo("p2")];
    let result = ts.service.ingest_full("album", photos, &ProgressBar::hidden()).await.unwrap();
    assert_eq!((result.processed, result.failed, result.total_faces), (1, 2, 1));

    let status = ts.service.get_status("album").await.unwrap();
    assert_eq!(status.state, IngestionState::Completed);

    let query = image(&[face(unit(DIM, 0), 1.), face(unit(DIM, 1), 1.)]);
    let r = ts.service.search("album", query, None, true).await.unwrap();
    assert_eq!(r.matched_item_ids, BTreeSet::from(["p2".to_string()]));
}

#[rstest]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn search_sees_whole_snapshots(fetcher: FakeFetcher) {
    let ts = service(fetcher, 2, false);
    let pb = ProgressBar::hidden();
    let ids = |ids: &[&str]| ids.iter().map(|id| id.to_string()).collect::<BTreeSet<_>>();
    // 合并和删除的先后顺序不确定，搜索只能看到这四种状态之一
    let allowed = [
        ids(&["p1", "p2", "p3", "p4"]),
        ids(&["p1", "p2", "p3", "p4", "p5"]),
        ids(&["p2", "p3", "p4"]),
        ids(&["p2", "p3", "p4", "p5"]),
    ];
    let query = || image(&(0..5).map(|i| face(unit(DIM, i), 1.)).collect::<Vec<_>>());

    for _ in 0..10 {
        let photos = ["p1", "p2", "p3", "p4"].map(photo).to_vec();
        ts.service.ingest_full("album", photos, &pb).await.unwrap();

        let to_remove = ["p1".to_string()];
        let (added, removed, r1, r2, r3) = tokio::join!(
            ts.service.ingest_incremental("album", vec![photo("p5")], &pb),
            ts.service.remove_items("album", &to_remove),
            ts.service.search("album", query(), Some(0.5), true),
            ts.service.search("album", query(), Some(0.5), true),
            ts.service.search("album", query(), Some(0.5), true),
        );
        assert_eq!(added.unwrap().faces_added, 1);
        assert_eq!(removed.unwrap().removed, 1);

        for r in [r1, r2, r3] {
            let r = r.unwrap();
            assert!(allowed.contains(&r.matched_item_ids), "{:?}", r.matched_item_ids);
            assert_eq!(r.match_details.len(), r.matched_item_ids.len());
            assert!((r.max_similarity - 1.).abs() < 1e-4);
        }

        let r = ts.service.search("album", query(), Some(0.5), true).await.unwrap();
        assert_eq!(r.matched_item_ids, allowed[3]);
    }
}
