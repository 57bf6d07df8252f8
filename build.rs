use std::env;
use std::fs;
use std::path::PathBuf;

use statrs::distribution::{ContinuousCDF, Normal};

/// Two-sided confidence levels served by the significance endpoint.
const CONFIDENCE_LEVELS: [f64; 3] = [0.90, 0.95, 0.99];
/// Statistical power used for sample size recommendations.
const POWER: f64 = 0.80;

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    let standard = Normal::new(0.0, 1.0).expect("standard normal is always valid");

    // Layout: [z_{α/2} for 90%, 95%, 99%, z_β for 80% power]
    let mut quantiles = Vec::with_capacity(CONFIDENCE_LEVELS.len() + 1);
    for level in CONFIDENCE_LEVELS {
        let alpha = 1.0 - level;
        quantiles.push(standard.inverse_cdf(1.0 - alpha / 2.0));
    }
    quantiles.push(standard.inverse_cdf(POWER));

    let out_dir = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR not set"));
    let dest_path = out_dir.join("normal_quantiles.in");
    let content = format!("{:?}", quantiles);

    fs::write(dest_path, content).expect("failed to write normal quantile lookup table");
}
