// Publishers only need upload and prefix listing.
use std::path::Path;

use heatmapper::{latest_first, Publisher};

#[derive(Default)]
struct InMemory(Vec<String>);

impl Publisher for InMemory {
    fn name(&self) -> &str {
        "memory"
    }

    fn publish(&mut self, _local_path: &Path, key: &str) -> anyhow::Result<()> {
        self.0.push(key.to_string());
        Ok(())
    }

    fn list(&self, prefix: &str) -> anyhow::Result<Vec<String>> {
        Ok(self.0.iter().filter(|k| k.starts_with(prefix)).cloned().collect())
    }
}

fn main() {
    let mut store = InMemory::default();
    store.publish(Path::new("a.png"), "heatmaps/heatmap_1.png").unwrap();
    store.publish(Path::new("b.png"), "heatmaps/heatmap_2.png").unwrap();
    store.publish(Path::new("c.csv"), "detections/detections_2.csv").unwrap();
    let keys = latest_first(store.list("heatmaps/").unwrap());
    assert_eq!(keys, vec!["heatmaps/heatmap_2.png", "heatmaps/heatmap_1.png"]);
}
