use crate::{DecodeTask, Decoder, DecoderConfig};
use qdec_core::b8;
use qdec_core::decoder::UnionFindDecoder;
use qdec_core::graph::DecodingGraph;
use qdec_core::{ProtocolError, Result};
use qdec_io::parser;
use qdec_io::stream::{ShotReader, ShotWriter, write_zero_predictions};
use tracing::debug;

/// In-process union-find decoder.
///
/// Builds a decoding graph from the error model, then decodes shots one at a
/// time as they stream in, so arbitrarily large batches run in constant
/// memory. Supports up to 64 observables.
#[derive(Debug, Clone)]
pub struct UnionFindFileDecoder {
    config: DecoderConfig,
}

impl UnionFindFileDecoder {
    pub const NAME: &'static str = "union_find";

    pub fn new() -> Self {
        Self {
            config: DecoderConfig::new(Self::NAME),
        }
    }

    pub fn from_config(config: &DecoderConfig) -> Result<Box<dyn Decoder>> {
        Ok(Box::new(Self {
            config: config.clone(),
        }))
    }
}

impl Default for UnionFindFileDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for UnionFindFileDecoder {
    fn config(&self) -> DecoderConfig {
        self.config.clone()
    }

    fn decode_via_files(&self, task: &DecodeTask) -> Result<()> {
        task.check()?;
        let shape = &task.shape;

        if shape.num_dets == 0 {
            // No detector can fire, so drain the input and predict nothing.
            let mut reader = ShotReader::open(&task.dets_b8_in_path, shape)?;
            while reader.next_record()?.is_some() {}
            reader.finish()?;
            return write_zero_predictions(&task.obs_predictions_b8_out_path, shape);
        }
        if shape.num_obs > 64 {
            return Err(ProtocolError::decode(format!(
                "union_find supports at most 64 observables, batch has {}",
                shape.num_obs
            )));
        }

        let dem = parser::load_dem_file(&task.dem_path)?;
        dem.validate_shape(shape.num_dets, shape.num_obs)?;
        let graph = DecodingGraph::from_dem(&dem)?;
        debug!(
            detectors = graph.num_detectors(),
            edges = graph.edges.len(),
            shots = shape.num_shots,
            "union_find graph ready"
        );

        let mut reader = ShotReader::open(&task.dets_b8_in_path, shape)?;
        let mut writer = ShotWriter::create(&task.obs_predictions_b8_out_path, shape)?;
        let mut decoder = UnionFindDecoder::new();
        let mut syndrome = Vec::with_capacity(64);

        while let Some(record) = reader.next_record()? {
            syndrome.clear();
            syndrome.extend(b8::set_indices(record, shape.num_dets));
            let mask = decoder.decode(&graph, &syndrome)?;
            writer.write_mask(mask)?;
        }

        reader.finish()?;
        writer.finish()?;
        Ok(())
    }
}
