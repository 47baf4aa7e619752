//! Prints the Eva CustomResourceDefinition as YAML.
//!
//! Usage: `cargo run -p crds --bin crdgen > config/crd/eva.yaml`

use crds::Eva;
use kube::CustomResourceExt;

fn main() -> Result<(), serde_yaml::Error> {
    let yaml = serde_yaml::to_string(&Eva::crd())?;
    print!("{yaml}");
    Ok(())
}
