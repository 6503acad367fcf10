//! Tone-curve LUT dump.

use anyhow::Result;
use darkroom_ops::{is_identity_curve, CurvePoint, ToneCurveLut};

use crate::CurveArgs;

pub fn run(args: CurveArgs) -> Result<()> {
    let points = args
        .points
        .iter()
        .map(|s| super::parse_point(s))
        .collect::<Result<Vec<CurvePoint>>>()?;
    let lut = ToneCurveLut::from_points(&points);

    if args.json {
        println!("{}", serde_json::to_string(&lut.as_bytes().to_vec())?);
        return Ok(());
    }

    if is_identity_curve(&points) {
        println!("# identity curve");
    }
    for row in lut.as_bytes().chunks(16) {
        let line: Vec<String> = row.iter().map(|v| format!("{v:3}")).collect();
        println!("{}", line.join(" "));
    }
    Ok(())
}
