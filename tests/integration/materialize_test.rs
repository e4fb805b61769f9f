use std::fs;

use crate::utils::{measurement, visit};
use cohort_labeler::algorithm::{TierLabel, Window, reconstruct_admissions};
use cohort_labeler::labeler::lab::{NEUTROPENIA_LAB, THOUSANDS_PER_UL};
use cohort_labeler::utils::test::{RecordingWarehouse, id_batch};
use cohort_labeler::{
    ParquetBatchWriter, RecordBatch, StreamOptions, export_records, read_parquet, stream_query,
};
use rustc_hash::FxHashMap;

fn row_count(batches: &[RecordBatch]) -> usize {
    batches.iter().map(RecordBatch::num_rows).sum()
}

#[test]
fn test_every_page_after_the_first_flushes() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("stream");
    let warehouse =
        RecordingWarehouse::new().with_pages(vec![id_batch(&[1, 2]), id_batch(&[3]), id_batch(&[4])]);
    let options = StreamOptions::new(&out).with_combine_every(1);

    let summary =
        stream_query(&warehouse, "SELECT person_id", &options, &ParquetBatchWriter::default())
            .unwrap();

    assert_eq!(summary.pages, 3);
    assert_eq!(summary.rows, 4);
    assert_eq!(
        summary.files,
        vec![out.join("features_1.parquet"), out.join("features_2.parquet")]
    );
    assert_eq!(row_count(&read_parquet(&summary.files[0]).unwrap()), 3);
    assert_eq!(row_count(&read_parquet(&summary.files[1]).unwrap()), 1);
}

#[test]
fn test_overwrite_clears_stale_files() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("stream");
    fs::create_dir_all(&out).unwrap();
    fs::write(out.join("stale.parquet"), b"old").unwrap();

    let warehouse = RecordingWarehouse::new().with_pages(vec![id_batch(&[1])]);
    let options = StreamOptions::new(&out).with_overwrite(true);
    let summary =
        stream_query(&warehouse, "SELECT person_id", &options, &ParquetBatchWriter::default())
            .unwrap();

    assert!(!out.join("stale.parquet").exists());
    assert_eq!(summary.files, vec![out.join("features_0.parquet")]);
}

#[test]
fn test_labels_from_reconstructed_admissions() {
    let visits = [
        visit(1, (1, 8), (3, 10)),
        visit(1, (3, 9), (5, 12)),
        visit(2, (8, 0), (9, 0)),
    ];
    let windows: Vec<Window> = reconstruct_admissions(&visits)
        .unwrap()
        .into_iter()
        .map(Window::from)
        .collect();
    let measurements = [
        measurement(1, (4, 0), 0.7, THOUSANDS_PER_UL),
        measurement(2, (8, 6), 1.1, THOUSANDS_PER_UL),
    ];
    let labels = NEUTROPENIA_LAB.evaluate(&windows, &measurements, &FxHashMap::default());
    let rows: Vec<TierLabel> = labels.iter().flat_map(|l| l.tier_rows()).collect();
    // patient 1: mild and moderate; patient 2: mild
    assert_eq!(rows.len(), 3);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("neutropenia.parquet");
    let written = export_records(&rows, &path, &ParquetBatchWriter::default()).unwrap();
    assert_eq!(written, 3);

    let batches = read_parquet(&path).unwrap();
    assert_eq!(row_count(&batches), 3);
    let schema = batches[0].schema();
    let columns: Vec<&str> = schema.fields().iter().map(|f| f.name().as_str()).collect();
    assert_eq!(
        columns,
        [
            "person_id",
            "window_start",
            "window_end",
            "severity_tier",
            "first_value",
            "first_measured_at",
        ]
    );
}
