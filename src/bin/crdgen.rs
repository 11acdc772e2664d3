//! CRD YAML Generator
//!
//! This binary generates the Kubernetes CRD manifest for the BackupClaim
//! resource defined by the backup-claim-operator.
//!
//! Usage: cargo run --bin crdgen > deploy/crds/backupclaims.yaml

use backup_claim_operator::crd::generate_crds;

fn main() -> anyhow::Result<()> {
    for crd in generate_crds()? {
        println!("---");
        print!("{}", crd);
    }
    Ok(())
}
