use anyhow::{anyhow, bail};
use mg_grid::*;
use tracing_subscriber::EnvFilter;

/// Fits a constant predictor on a bootstrap sample of the target column.
struct ConstantTrainer {
    rng: SharedRng,
}

#[derive(Debug)]
struct ConstantModel {
    method: String,
    estimate: f64,
}

impl Trainer for ConstantTrainer {
    type Artifact = ConstantModel;

    fn fit(&mut self, config: &SettingsMap) -> anyhow::Result<ConstantModel> {
        let data = config
            .get("data")
            .and_then(SettingValue::as_handle)
            .and_then(|h| h.downcast_ref::<Vec<f64>>())
            .ok_or_else(|| anyhow!("no numeric `data` handle in the configuration"))?;
        let method = config
            .get("method")
            .and_then(SettingValue::as_str)
            .unwrap_or("mean");
        let size = match config
            .get_path(&[TRAIN_CONTROL_KEY, "sample_size"])
            .and_then(SettingValue::as_i64)
        {
            Some(raw) => match usize::try_from(raw) {
                Ok(size) => size,
                Err(_) => bail!("sample_size must be non-negative, got {raw}"),
            },
            None => data.len(),
        };

        let mut sample: Vec<f64> = self
            .rng
            .bootstrap_indices(data.len(), size)
            .into_iter()
            .map(|i| data[i])
            .collect();
        if sample.is_empty() {
            bail!("empty bootstrap sample");
        }

        let estimate = match method {
            "mean" => sample.iter().sum::<f64>() / sample.len() as f64,
            "median" => {
                sample.sort_by(|a, b| a.total_cmp(b));
                sample[sample.len() / 2]
            }
            other => bail!("unsupported method: {other}"),
        };

        Ok(ConstantModel {
            method: method.to_string(),
            estimate,
        })
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("mg_grid=info".parse()?))
        .init();

    let target: Vec<f64> = (1..=20).map(f64::from).collect();

    let mut grid: ModelGrid<ConstantModel> = ModelGrid::new();
    grid.share_settings(
        SettingsMap::new()
            .with("data", Handle::new("target", target))
            .with(
                TRAIN_CONTROL_KEY,
                SettingsMap::new().with("method", "boot").with("sample_size", 10),
            ),
    );
    grid.add_model(Some("mean"), SettingsMap::new().with("method", "mean"))?;
    grid.add_model(
        Some("median_big"),
        SettingsMap::new()
            .with("method", "median")
            .with(CUSTOM_CONTROL_KEY, SettingsMap::new().with("sample_size", 40)),
    )?;
    grid.add_model(None, SettingsMap::new().with("method", "mode"))?;

    println!("{grid}");

    let rng = SharedRng::default();
    let mut trainer = ConstantTrainer { rng: rng.clone() };
    let mut seeder = rng;
    let report = grid.train(
        &mut trainer,
        &mut seeder,
        &TracingProgress,
        TrainOptions::from_env(),
    )?;
    println!(
        "Run {} trained {} model(s) in {} ms",
        report.run_id,
        report.trained.len(),
        report.duration().num_milliseconds()
    );

    for (name, model) in grid.successful_fits() {
        println!("{name}: {} estimate = {:.3}", model.method, model.estimate);
    }
    for failure in grid.failed_fits() {
        println!("{failure}");
    }

    grid.edit_model("Model1", SettingsMap::new().with("method", "mean"))?;
    grid.train(&mut trainer, &mut seeder, &TracingProgress, TrainOptions::default())?;
    println!("\n{grid}");

    println!("Declaration:\n{}", grid.declaration_to_json()?);
    Ok(())
}
