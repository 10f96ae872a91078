//! Metadata-index descent under deep trees, device filtering, and the
//! shared chunk cache.

use std::sync::Arc;

use tsfile::read::cache::ChunkCache;
use tsfile::{
    CompressionType, ConfigValue, DeviceId, MeasurementSchema, Order, ReaderOptions, TSDataType,
    TSEncoding, TsFileError, TsFileReader, TsFileWriter, TsRecord, Value,
};

fn int_schema(name: &str) -> MeasurementSchema {
    MeasurementSchema::new(
        name,
        TSDataType::Int32,
        TSEncoding::Plain,
        CompressionType::Uncompressed,
    )
}

/// Builds a file with many measurements under a tiny index fan-out, forcing
/// internal measurement nodes into the tree.
async fn build_wide_device(path: &std::path::Path, measurements: usize) {
    let config = ConfigValue {
        max_degree_of_index_node: 4,
        ..ConfigValue::default()
    };
    let mut writer = TsFileWriter::create_with_config(path, config).await.unwrap();
    for m in 0..measurements {
        writer
            .register_timeseries("factory.line1", int_schema(&format!("m{:03}", m)))
            .unwrap();
    }
    let mut record = TsRecord::new("factory.line1", 7);
    for m in 0..measurements {
        record = record.add_point(&format!("m{:03}", m), Value::Int32(m as i32));
    }
    writer.write_record(&record).await.unwrap();
    writer.close().await.unwrap();
}

#[tokio::test]
async fn test_descent_through_internal_measurement_nodes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("wide.tsfile");
    build_wide_device(&path, 100).await;

    let reader = TsFileReader::open(&path).await.unwrap();
    let device = DeviceId::from_path("factory.line1");

    // every measurement is reachable through the multi-level tree
    for m in [0usize, 3, 4, 41, 63, 99] {
        let name = format!("m{:03}", m);
        let stats = reader.series_statistics(&device, &name).await.unwrap();
        assert_eq!(stats.count(), 1, "descent failed for {}", name);
    }

    // exact-search misses surface as missing series, not corruption
    let err = reader.series_statistics(&device, "m100").await.unwrap_err();
    assert!(matches!(err, TsFileError::MeasurementNotExist(_)));
    let err = reader
        .series_statistics(&DeviceId::from_path("factory.line2"), "m000")
        .await
        .unwrap_err();
    assert!(matches!(err, TsFileError::DeviceNotExist(_)));

    // the leaf walk sees everything the descent sees
    let metas = reader.device_timeseries_meta(&device).await.unwrap();
    assert_eq!(metas.len(), 100);
}

#[tokio::test]
async fn test_descent_through_internal_device_nodes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("many_devices.tsfile");

    let config = ConfigValue {
        max_degree_of_index_node: 4,
        ..ConfigValue::default()
    };
    let mut writer = TsFileWriter::create_with_config(&path, config).await.unwrap();
    // one table, enough devices to need internal device nodes
    for d in 0..30 {
        let device = format!("fleet.truck{:02}", d);
        writer.register_timeseries(&device, int_schema("speed")).unwrap();
        let record = TsRecord::new(&device, 5).add_point("speed", Value::Int32(d));
        writer.write_record(&record).await.unwrap();
    }
    writer.close().await.unwrap();

    let reader = TsFileReader::open(&path).await.unwrap();
    let devices = reader.devices("fleet").await.unwrap();
    assert_eq!(devices.len(), 30);
    let mut sorted = devices.clone();
    sorted.sort();
    assert_eq!(devices, sorted, "devices must come back in id order");

    for d in [0, 7, 15, 29] {
        let device = DeviceId::from_path(&format!("fleet.truck{:02}", d));
        let stats = reader.series_statistics(&device, "speed").await.unwrap();
        assert_eq!(stats.count(), 1);
    }
}

#[tokio::test]
async fn test_id_filter_restricts_devices() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("filtered.tsfile");

    let mut writer = TsFileWriter::create(&path).await.unwrap();
    for d in 0..10 {
        let device = format!("fleet.car{}", d);
        writer.register_timeseries(&device, int_schema("s1")).unwrap();
        let record = TsRecord::new(&device, 1).add_point("s1", Value::Int32(d));
        writer.write_record(&record).await.unwrap();
    }
    writer.close().await.unwrap();

    let reader = TsFileReader::open(&path).await.unwrap();
    let mut result = reader
        .query_with_id_filter(
            "fleet",
            vec!["s1".to_string()],
            None,
            None,
            Order::DeviceMajor,
            Some(Arc::new(|d: &DeviceId| {
                d.segments().last().map(|s| s.ends_with('7')).unwrap_or(false)
            })),
        )
        .await
        .unwrap();

    let block = result.next_block().await.unwrap().expect("car7 block");
    assert_eq!(block.columns[0].values, vec![Value::Int32(7)]);
    assert!(result.next_block().await.unwrap().is_none());
}

#[tokio::test]
async fn test_shared_cache_across_readers() {
    let dir = tempfile::tempdir().unwrap();
    let path_a = dir.path().join("a.tsfile");
    let path_b = dir.path().join("b.tsfile");

    for (path, v) in [(&path_a, 1i32), (&path_b, 2i32)] {
        let mut writer = TsFileWriter::create(path).await.unwrap();
        writer.register_timeseries("d", int_schema("s1")).unwrap();
        let record = TsRecord::new("d", 1).add_point("s1", Value::Int32(v));
        writer.write_record(&record).await.unwrap();
        writer.close().await.unwrap();
    }

    let cache = Arc::new(ChunkCache::new(16));
    let reader_a =
        TsFileReader::open_with_shared_cache(&path_a, cache.clone(), ReaderOptions::default())
            .await
            .unwrap();
    let reader_b =
        TsFileReader::open_with_shared_cache(&path_b, cache.clone(), ReaderOptions::default())
            .await
            .unwrap();

    async fn check(reader: &TsFileReader, expected: i32) {
        let mut result = reader
            .query("d", vec!["s1".to_string()], None, None, Order::DeviceMajor)
            .await
            .unwrap();
        let block = result.next_block().await.unwrap().expect("block");
        assert_eq!(block.columns[0].values, vec![Value::Int32(expected)]);
    }

    check(&reader_a, 1).await;
    check(&reader_b, 2).await;
    // both files contributed distinct cache entries
    assert_eq!(cache.len(), 2);

    // cached reads return the same data
    check(&reader_a, 1).await;
    check(&reader_b, 2).await;
}

#[tokio::test]
async fn test_chunk_regions_are_ordered_and_nonoverlapping() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ordered.tsfile");
    build_wide_device(&path, 20).await;

    let reader = TsFileReader::open(&path).await.unwrap();
    let device = DeviceId::from_path("factory.line1");
    let metas = reader.device_timeseries_meta(&device).await.unwrap();

    // chunk header offsets are strictly increasing in measurement order,
    // matching the flush order of a chunk group
    let offsets: Vec<i64> = metas
        .iter()
        .map(|m| m.chunk_metas[0].offset_of_chunk_header)
        .collect();
    for pair in offsets.windows(2) {
        assert!(pair[0] < pair[1], "chunk offsets out of order: {:?}", offsets);
    }
}
