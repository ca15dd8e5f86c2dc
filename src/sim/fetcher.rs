//! Packs [`OrbitState`] into GPU-ready buffers.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use bytes::Bytes;

use crate::sim::compress::compress;
use crate::sim::orbit::OrbitState;
use crate::streaming::{BufferSet, Encoding, Fetcher};
use crate::tick::Tick;

/// Buffer names [`OrbitFetcher`] can produce.
pub const KNOWN_BUFFERS: [&str; 4] = ["position", "color", "size", "index"];

/// Raw little-endian bytes for one buffer and its element count.
fn encode_buffer(name: &str, state: &OrbitState) -> Option<(Vec<u8>, usize)> {
    let count = state.len();
    let bytes = match name {
        "position" => state
            .points
            .iter()
            .flatten()
            .flat_map(|v| v.to_le_bytes())
            .collect(),
        "color" => state
            .colors
            .iter()
            .flatten()
            .flat_map(|v| v.to_le_bytes())
            .collect(),
        "size" => state
            .points
            .iter()
            .map(|[x, y, _]| 1.0 + 0.25 * (x * x + y * y).sqrt())
            .flat_map(|v: f32| v.to_le_bytes())
            .collect(),
        "index" => (0..count as u32).flat_map(|i| i.to_le_bytes()).collect(),
        _ => return None,
    };
    Some((bytes, count))
}

#[derive(Debug, Clone, Copy)]
pub struct OrbitFetcher {
    encoding: Encoding,
    level: i32,
}

impl OrbitFetcher {
    pub fn new(encoding: Encoding, level: i32) -> Self {
        Self { encoding, level }
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// Build the set synchronously. CPU bound.
    pub fn build(
        &self,
        seq: u64,
        state: &OrbitState,
        buffers: &[String],
        programs: &[String],
    ) -> Result<BufferSet> {
        let mut set = BufferSet::new(seq, self.encoding).with_programs(programs);
        for name in buffers {
            let Some((raw, count)) = encode_buffer(name, state) else {
                bail!("unknown buffer {:?}", name);
            };
            let packed = compress(self.encoding, self.level, &raw)
                .with_context(|| format!("compressing {}", name))?;
            set.insert(name.as_str(), Bytes::from(packed), raw.len(), count);
        }
        Ok(set)
    }
}

#[async_trait]
impl Fetcher for OrbitFetcher {
    type State = OrbitState;

    async fn fetch(
        &self,
        tick: &Tick<OrbitState>,
        buffers: &[String],
        programs: &[String],
    ) -> Result<BufferSet> {
        let fetcher = *self;
        let seq = tick.seq();
        let state = Arc::clone(tick.state());
        let buffers = buffers.to_vec();
        let programs = programs.to_vec();

        tokio::task::spawn_blocking(move || fetcher.build(seq, &state, &buffers, &programs))
            .await
            .context("fetch task panicked")?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::compress::decompress;
    use crate::sim::orbit::OrbitStepper;
    use crate::tick::Stepper;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn tick(points: usize) -> Tick<OrbitState> {
        let state = OrbitStepper::new(points).step().unwrap();
        Tick::new(5, state)
    }

    #[tokio::test]
    async fn test_fetch_known_buffers() {
        let fetcher = OrbitFetcher::new(Encoding::Gzip, 6);
        let tick = tick(10);

        let set = fetcher
            .fetch(&tick, &names(&KNOWN_BUFFERS), &names(&["points"]))
            .await
            .unwrap();

        assert_eq!(set.tick, 5);
        assert_eq!(set.len(), 4);
        assert_eq!(set.programs, names(&["points"]));

        let meta = set.metadata();
        assert_eq!(meta["position"].byte_length, 10 * 3 * 4);
        assert_eq!(meta["position"].element_count, 10);
        assert_eq!(meta["color"].byte_length, 10 * 3 * 4);
        assert_eq!(meta["size"].byte_length, 10 * 4);
        assert_eq!(meta["index"].byte_length, 10 * 4);
    }

    #[tokio::test]
    async fn test_position_bytes_are_little_endian_floats() {
        let fetcher = OrbitFetcher::new(Encoding::Zstd, 3);
        let tick = tick(2);

        let set = fetcher
            .fetch(&tick, &names(&["position", "index"]), &[])
            .await
            .unwrap();

        let raw = decompress(Encoding::Zstd, &set.get("position").unwrap().data).unwrap();
        let first = f32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
        assert_eq!(first, tick.state().points[0][0]);

        let index = decompress(Encoding::Zstd, &set.get("index").unwrap().data).unwrap();
        assert_eq!(index, vec![0, 0, 0, 0, 1, 0, 0, 0]);
    }

    #[tokio::test]
    async fn test_unknown_buffer_fails() {
        let fetcher = OrbitFetcher::new(Encoding::Gzip, 1);
        let err = fetcher
            .fetch(&tick(1), &names(&["position", "normal"]), &[])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("normal"));
    }

    #[tokio::test]
    async fn test_no_buffers_is_empty_set() {
        let fetcher = OrbitFetcher::new(Encoding::Gzip, 1);
        let set = fetcher.fetch(&tick(3), &[], &[]).await.unwrap();
        assert!(set.is_empty());
    }
}
