//! Key-value records as a two-column Parquet file.

use std::sync::Arc;

use anyhow::{Context, Result};
use arrow::array::{Array, ArrayRef, BinaryArray};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use ::parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use ::parquet::arrow::ArrowWriter;
use ::parquet::basic::Compression;
use ::parquet::file::properties::WriterProperties;

use crate::KeyValue;

const BATCH_ROWS: usize = 8192;

fn schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("key", DataType::Binary, false),
        Field::new("value", DataType::Binary, false),
    ]))
}

/// Write `rows` as a SNAPPY-compressed Parquet file.
pub fn write(rows: &[KeyValue]) -> Result<Bytes> {
    let schema = schema();
    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();
    let mut out = Vec::new();
    let mut writer = ArrowWriter::try_new(&mut out, Arc::clone(&schema), Some(props))?;
    for chunk in rows.chunks(BATCH_ROWS) {
        let keys: Vec<&[u8]> = chunk.iter().map(|kv| kv.key.as_ref()).collect();
        let values: Vec<&[u8]> = chunk.iter().map(|kv| kv.value.as_ref()).collect();
        let batch = RecordBatch::try_new(
            Arc::clone(&schema),
            vec![
                Arc::new(BinaryArray::from(keys)) as ArrayRef,
                Arc::new(BinaryArray::from(values)) as ArrayRef,
            ],
        )?;
        writer.write(&batch)?;
    }
    // the footer is only written on close
    writer.close()?;
    Ok(Bytes::from(out))
}

fn binary_column<'a>(batch: &'a RecordBatch, index: usize) -> Result<&'a BinaryArray> {
    batch
        .column(index)
        .as_any()
        .downcast_ref::<BinaryArray>()
        .with_context(|| format!("parquet column {index} is not binary"))
}

/// Read every row of a Parquet file written by [`write`].
pub fn read(data: Bytes) -> Result<Vec<KeyValue>> {
    let reader = ParquetRecordBatchReaderBuilder::try_new(data)?
        .with_batch_size(BATCH_ROWS)
        .build()?;
    let mut rows = Vec::new();
    for batch in reader {
        let batch = batch?;
        let keys = binary_column(&batch, 0)?;
        let values = binary_column(&batch, 1)?;
        for i in 0..batch.num_rows() {
            rows.push(KeyValue {
                key: Bytes::copy_from_slice(keys.value(i)),
                value: Bytes::copy_from_slice(values.value(i)),
            });
        }
    }
    Ok(rows)
}
