//! Prints all BootForge CRD manifests as a multi-document YAML stream.
//!
//! Usage: `cargo run --bin crdgen > deploy/crds.yaml`

use kube::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    let manifests = [
        serde_yaml::to_string(&crds::Machine::crd())?,
        serde_yaml::to_string(&crds::Provision::crd())?,
        serde_yaml::to_string(&crds::BootTarget::crd())?,
        serde_yaml::to_string(&crds::BootMedia::crd())?,
        serde_yaml::to_string(&crds::ResponseTemplate::crd())?,
    ];
    print!("{}", manifests.join("---\n"));
    Ok(())
}
