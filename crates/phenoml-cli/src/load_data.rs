use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use anyhow::{Context, Result};
use csv::{ReaderBuilder, StringRecord};
use ndarray::Array2;

use phenoml::data_handling::{FeatureMatrix, Label, Metadata};

fn delimiter_for(path: &Path) -> u8 {
    match path.extension().and_then(|e| e.to_str()).map(|e| e.to_lowercase()) {
        Some(ext) if ext == "csv" => b',',
        _ => b'\t',
    }
}

/// Header and records of a CSV (by extension) or TSV table.
fn read_table(path: &Path) -> Result<(StringRecord, Vec<StringRecord>)> {
    let file = File::open(path).with_context(|| format!("Failed to open file: {:?}", path))?;
    let mut rdr = ReaderBuilder::new()
        .delimiter(delimiter_for(path))
        .has_headers(true)
        .from_reader(BufReader::new(file));
    let headers = rdr
        .headers()
        .with_context(|| format!("Failed to read header of {:?}", path))?
        .clone();
    let records = rdr
        .records()
        .collect::<std::result::Result<Vec<_>, _>>()
        .with_context(|| format!("Failed to parse {:?}", path))?;
    Ok((headers, records))
}

/// Load a features × samples table: the first column names the feature, the
/// remaining header fields are sample ids.
pub fn load_feature_matrix<P: AsRef<Path>>(path: P) -> Result<FeatureMatrix> {
    let path = path.as_ref();
    let (headers, records) = read_table(path)?;
    let sample_ids: Vec<String> = headers.iter().skip(1).map(|s| s.to_string()).collect();
    if sample_ids.is_empty() {
        anyhow::bail!("Feature table {:?} has no sample columns", path);
    }

    let mut feature_names = Vec::with_capacity(records.len());
    let mut values = Vec::with_capacity(records.len() * sample_ids.len());
    for (line, record) in records.iter().enumerate() {
        let name = record.get(0).unwrap_or_default();
        if record.len() != sample_ids.len() + 1 {
            anyhow::bail!(
                "Feature '{}' in {:?} has {} values for {} samples",
                name,
                path,
                record.len().saturating_sub(1),
                sample_ids.len()
            );
        }
        feature_names.push(name.to_string());
        for field in record.iter().skip(1) {
            let v: f64 = field.trim().parse().with_context(|| {
                format!("Invalid value '{}' for feature '{}' (row {})", field, name, line + 2)
            })?;
            values.push(v);
        }
    }

    let data = Array2::from_shape_vec((feature_names.len(), sample_ids.len()), values)?;
    let matrix = FeatureMatrix::new(data, feature_names, sample_ids)?;
    log::info!(
        "Loaded {} features x {} samples from {:?}",
        matrix.n_features(),
        matrix.n_samples(),
        path
    );
    Ok(matrix)
}

/// Load a label table: sample ids in the first column, values in `column`
/// (the second column when unset).
///
/// With `case` set the label is binary with that class as case; without it
/// the values must all be numeric and the label is continuous.
pub fn load_label<P: AsRef<Path>>(path: P, column: Option<&str>, case: Option<&str>) -> Result<Label> {
    let path = path.as_ref();
    let (headers, records) = read_table(path)?;
    let col = match column {
        Some(name) => headers
            .iter()
            .position(|h| h == name)
            .with_context(|| format!("Label table {:?} has no column '{}'", path, name))?,
        None => 1,
    };
    if col == 0 || col >= headers.len() {
        anyhow::bail!("Label table {:?} needs a sample id column and a value column", path);
    }

    let mut sample_ids = Vec::with_capacity(records.len());
    let mut values = Vec::with_capacity(records.len());
    for record in &records {
        let (Some(id), Some(value)) = (record.get(0), record.get(col)) else {
            anyhow::bail!("Truncated row in label table {:?}", path);
        };
        sample_ids.push(id.to_string());
        values.push(value.trim().to_string());
    }

    let label = match case {
        Some(case) => Label::binary(sample_ids, &values, case)?,
        None => {
            let numeric = values
                .iter()
                .zip(&sample_ids)
                .map(|(v, id)| {
                    v.parse::<f64>().with_context(|| {
                        format!(
                            "Non-numeric label '{}' for sample '{}'; set a case class for a binary label",
                            v, id
                        )
                    })
                })
                .collect::<Result<Vec<f64>>>()?;
            Label::continuous(sample_ids, numeric)?
        }
    };
    label.log_summary();
    Ok(label)
}

/// Load a sample metadata table with sample ids in the first column.
pub fn load_metadata<P: AsRef<Path>>(path: P) -> Result<Metadata> {
    let path = path.as_ref();
    let (headers, records) = read_table(path)?;
    let sample_ids: Vec<String> = records
        .iter()
        .map(|r| r.get(0).unwrap_or_default().to_string())
        .collect();
    let mut metadata = Metadata::new(sample_ids)?;
    for (c, name) in headers.iter().enumerate().skip(1) {
        let values = records
            .iter()
            .map(|r| r.get(c).unwrap_or_default().to_string())
            .collect();
        metadata = metadata.with_column(name, values)?;
    }
    log::debug!(
        "Loaded metadata for {} samples ({} columns) from {:?}",
        metadata.sample_ids().len(),
        headers.len().saturating_sub(1),
        path
    );
    Ok(metadata)
}
