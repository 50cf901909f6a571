use kube::CustomResourceExt;
use virta::crd::analysis::{AnalysisRun, AnalysisTemplate};
use virta::crd::rollout::Rollout;

fn main() -> anyhow::Result<()> {
    // Print the CRD manifests as a JSON array.
    // Use: cargo run --bin gen-crd | python3 -c "import sys,json,yaml; print(yaml.dump_all(json.load(sys.stdin), default_flow_style=False))"
    // to convert to YAML.

    let crds = vec![
        serde_json::to_value(Rollout::crd())?,
        serde_json::to_value(AnalysisTemplate::crd())?,
        serde_json::to_value(AnalysisRun::crd())?,
    ];

    println!("{}", serde_json::to_string_pretty(&crds)?);
    Ok(())
}
