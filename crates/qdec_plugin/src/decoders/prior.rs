use crate::{DecodeTask, Decoder, DecoderConfig};
use qdec_core::b8;
use qdec_core::{ProtocolError, Result};
use qdec_io::parser;
use qdec_io::stream::{ShotReader, ShotWriter};
use tracing::debug;

/// Predicts from the error model alone, ignoring detection events.
///
/// Observable `k` is predicted flipped in every shot when the probability
/// that the model flips it an odd number of times exceeds `threshold`
/// (default 0.5). Useful as a baseline and for exercising the protocol with
/// fully predictable output.
#[derive(Debug, Clone)]
pub struct PriorDecoder {
    config: DecoderConfig,
    threshold: f64,
}

impl PriorDecoder {
    pub const NAME: &'static str = "prior";

    pub fn from_config(config: &DecoderConfig) -> Result<Box<dyn Decoder>> {
        let threshold = config.parse_param::<f64>("threshold")?.unwrap_or(0.5);
        if !(0.0..=1.0).contains(&threshold) {
            return Err(ProtocolError::decode(format!(
                "prior threshold {threshold} is outside [0, 1]"
            )));
        }
        Ok(Box::new(Self {
            config: config.clone(),
            threshold,
        }))
    }
}

impl Decoder for PriorDecoder {
    fn config(&self) -> DecoderConfig {
        self.config.clone()
    }

    fn decode_via_files(&self, task: &DecodeTask) -> Result<()> {
        task.check()?;
        let shape = &task.shape;

        let dem = parser::load_dem_file(&task.dem_path)?;
        dem.validate_shape(shape.num_dets, shape.num_obs)?;

        let mut prediction = vec![false; shape.num_obs];
        for (k, p) in dem
            .observable_flip_probabilities(shape.num_obs)
            .into_iter()
            .enumerate()
        {
            prediction[k] = p > self.threshold;
        }
        debug!(?prediction, "prior prediction fixed for every shot");

        let mut reader = ShotReader::open(&task.dets_b8_in_path, shape)?;
        let mut writer = ShotWriter::create(&task.obs_predictions_b8_out_path, shape)?;
        let record = b8::encode(&prediction, shape.num_obs)?;
        while reader.next_record()?.is_some() {
            writer.write_record(&record)?;
        }

        reader.finish()?;
        writer.finish()?;
        Ok(())
    }
}
