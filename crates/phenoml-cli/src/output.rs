use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

use phenoml::partition::DataSplit;
use phenoml::predictor::PredictionMatrix;
use phenoml::trainer::TrainedModels;

fn tsv_writer(path: &Path) -> Result<csv::Writer<BufWriter<File>>> {
    let file = File::create(path).with_context(|| format!("Failed to create output file: {:?}", path))?;
    Ok(csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_writer(BufWriter::new(file)))
}

/// One row per sample with its 1-based test fold in every resample.
pub fn write_data_split<P: AsRef<Path>>(split: &DataSplit, path: P) -> Result<()> {
    let path = path.as_ref();
    let mut writer = tsv_writer(path)?;
    let mut header = vec!["sample_id".to_string()];
    header.extend((1..=split.num_resample()).map(|r| format!("resample_{}", r)));
    writer.write_record(&header)?;
    for (s, id) in split.sample_ids().iter().enumerate() {
        let mut row = vec![id.clone()];
        row.extend((0..split.num_resample()).map(|r| (split.fold_assignment(r)[s] + 1).to_string()));
        writer.write_record(&row)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_predictions<P: AsRef<Path>>(predictions: &PredictionMatrix, path: P) -> Result<()> {
    let path = path.as_ref();
    let mut writer = tsv_writer(path)?;
    let mut header = vec!["sample_id".to_string()];
    header.extend(predictions.column_names().iter().cloned());
    writer.write_record(&header)?;
    for (id, row) in predictions.sample_ids().iter().zip(predictions.values().rows()) {
        let mut record = vec![id.clone()];
        record.extend(row.iter().map(|v| format!("{:.6}", v)));
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

/// Features × models weight table; features a model did not use are 0.
pub fn write_feature_weights<P: AsRef<Path>>(models: &TrainedModels, path: P) -> Result<()> {
    let path = path.as_ref();
    let mut writer = tsv_writer(path)?;
    let mut header = vec!["feature".to_string()];
    header.extend(
        models
            .models()
            .iter()
            .map(|m| format!("fold_{}_resample_{}", m.fold() + 1, m.resample() + 1)),
    );
    writer.write_record(&header)?;
    let weights = models.weight_matrix();
    for (name, row) in models.feature_names().iter().zip(weights.rows()) {
        let mut record = vec![name.clone()];
        record.extend(row.iter().map(|w| format!("{:.6e}", w)));
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

/// Resolved hyper-parameters and model summary of every instance.
pub fn write_model_summaries<P: AsRef<Path>>(models: &TrainedModels, path: P) -> Result<()> {
    let path = path.as_ref();
    let mut writer = tsv_writer(path)?;
    writer.write_record(["fold", "resample", "n_features", "hyperparameters", "summary"])?;
    for m in models.models() {
        writer.write_record(&[
            (m.fold() + 1).to_string(),
            (m.resample() + 1).to_string(),
            m.feature_names().len().to_string(),
            serde_json::to_string(m.hyperparameters())?,
            m.summary(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_json<T: Serialize, P: AsRef<Path>>(value: &T, path: P) -> Result<()> {
    let path = path.as_ref();
    let file = File::create(path).with_context(|| format!("Failed to create output file: {:?}", path))?;
    serde_json::to_writer_pretty(BufWriter::new(file), value)
        .with_context(|| format!("Failed to write {:?}", path))?;
    Ok(())
}
