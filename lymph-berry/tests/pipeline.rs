use lymph_berry::prelude::*;
use ndarray::Array3;
use std::fs;
use std::path::Path;

fn at() -> chrono::DateTime<chrono::Utc> {
    use chrono::TimeZone;
    chrono::Utc.with_ymd_and_hms(2024, 5, 1, 8, 30, 0).unwrap()
}

/// 写出一个受试者: 6 x 6 x 6, 分辨率 2 mm.
///
/// 病灶 1: 2 x 2 x 2 方块, 落在区域 5;
/// 病灶 2: 单个体素, 落在区域 102;
/// 强度等于 `w + 1`.
fn write_subject(dir: &Path, id: &str, with_pet: bool) {
    let g = Geometry::isotropic((6, 6, 6), 2.0);

    let mut mask = Array3::zeros((6, 6, 6));
    for z in 0..2 {
        for h in 0..2 {
            for w in 0..2 {
                mask[(z, h, w)] = 1u8;
            }
        }
    }
    mask[(5, 5, 5)] = 1;
    LesionMask::from_array(mask, g.clone())
        .unwrap()
        .save(dir.join(format!("{id}_LYM_label.nii.gz")))
        .unwrap();

    let atlas = Array3::from_shape_fn((6, 6, 6), |(z, _, _)| if z < 3 { 5u16 } else { EXTREMITIES });
    AtlasVolume::from_array(atlas, g.clone())
        .unwrap()
        .save(dir.join(format!("{id}_all.nii.gz")))
        .unwrap();

    if with_pet {
        let pet = Array3::from_shape_fn((6, 6, 6), |(_, _, w)| w as f32 + 1.0);
        IntensityVolume::from_array(pet, g)
            .unwrap()
            .save(dir.join(format!("{id}_LYM.nii.gz")))
            .unwrap();
    }
}

#[test]
fn batch_round_trip() {
    let _ = simple_logger::init_with_level(log::Level::Debug);

    let input = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    write_subject(input.path(), "P1", true);
    fs::create_dir(input.path().join("nested")).unwrap();
    write_subject(&input.path().join("nested"), "P2", false);

    let subjects = discover(input.path(), &DiscoveryOptions::default());
    assert_eq!(subjects.len(), 2);

    let config = AnalysisConfig::default();
    let options = BatchOptions {
        output: OutputOptions {
            out_dir: out.path().to_owned(),
            save_instances: true,
        },
        workers: 2,
    };
    let batch = run_batch(&subjects, &config, &options, at()).unwrap();
    assert_eq!(batch.succeeded(), 2);

    let p1 = batch
        .reports()
        .find(|r| r.subject_id() == "P1")
        .unwrap()
        .summary()
        .clone();
    assert_eq!(p1.lesion_count, 2);
    assert!((p1.total_volume_ml - 0.072).abs() < 1e-9);
    assert_eq!(p1.stage, "multi-region");
    assert_eq!(p1.top_n, [1, 2]);
    assert!(p1.has_intensity);

    let csv = fs::read_to_string(out.path().join("P1_lesion_stats.csv")).unwrap();
    let rows: Vec<Vec<&str>> = csv.lines().map(|l| l.split(',').collect()).collect();
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0][14], "intensity_p95");
    assert_eq!(rows[1][8], "liver");
    assert_eq!(rows[1][9], "1.0000");
    // 病灶 1 的强度为 1, 2 (各 4 个体素).
    assert_eq!(rows[1][11], "1.0000");
    assert_eq!(rows[1][12], "1.5000");
    assert_eq!(rows[1][13], "2.0000");
    // 单体素病灶: 百分位等于该体素的值.
    assert_eq!(rows[2][8], "extremities");
    assert_eq!(rows[2][14], "6.0000");

    let csv = fs::read_to_string(out.path().join("P2_lesion_stats.csv")).unwrap();
    let row: Vec<&str> = csv.lines().nth(1).unwrap().split(',').collect();
    assert!(row[11..15].iter().all(|c| c.is_empty()));

    let inst = AtlasVolume::open(out.path().join("P1_inst.nii.gz")).unwrap();
    assert_eq!(inst[(0, 0, 0)], 1);
    assert_eq!(inst[(5, 5, 5)], 2);
    assert_eq!(inst.count(0), 216 - 9);

    let json: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(out.path().join("P2_summary.json")).unwrap())
            .unwrap();
    assert_eq!(json["subject_id"], "P2");
    assert_eq!(json["has_intensity"], false);
    assert_eq!(json["generated_at"], "2024-05-01T08:30:00Z");

    batch.save_summary(out.path()).unwrap();
    assert!(out.path().join("batch_summary.json").is_file());
}

#[test]
fn rerun_is_byte_identical() {
    let input = tempfile::tempdir().unwrap();
    write_subject(input.path(), "R", true);
    let subjects = discover(input.path(), &DiscoveryOptions::default());
    let config = AnalysisConfig::default();

    let run = || {
        let out = tempfile::tempdir().unwrap();
        let options = BatchOptions {
            output: OutputOptions::new(out.path()),
            workers: 1,
        };
        run_batch(&subjects, &config, &options, at()).unwrap();
        (
            fs::read(out.path().join("R_lesion_stats.csv")).unwrap(),
            fs::read(out.path().join("R_summary.json")).unwrap(),
        )
    };
    assert_eq!(run(), run());
}
