use celldet::config::CropConfig;
use celldet::vision::{BoundingBox, Detection, Detector};
use celldet::{Result, extract_cells};
use image::{DynamicImage, GenericImageView, Rgb, RgbImage};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

#[cfg(test)]
mod tests {
    use super::*;

    /// 按调用次序返回预设结果的检测器
    struct ScriptedDetector {
        frames: Vec<Vec<Detection>>,
        calls: usize,
        names: Vec<String>,
    }

    impl ScriptedDetector {
        fn new(frames: Vec<Vec<Detection>>) -> Self {
            Self {
                frames,
                calls: 0,
                names: vec!["Cross".into(), "U87".into(), "NHA".into()],
            }
        }
    }

    impl Detector for ScriptedDetector {
        fn detect(&mut self, _img: &DynamicImage) -> Result<Vec<Detection>> {
            let frame = self.frames.get(self.calls).cloned().unwrap_or_default();
            self.calls += 1;
            Ok(frame)
        }

        fn class_names(&self) -> &[String] {
            &self.names
        }
    }

    fn det(name: &str, x1: f32, y1: f32, x2: f32, y2: f32) -> Detection {
        let id = match name {
            "Cross" => 0,
            "U87" => 1,
            _ => 2,
        };
        Detection::new(BoundingBox::new(x1, y1, x2, y2), id, name.to_string(), 0.9)
    }

    fn write_images(dir: &Path, names: &[&str]) {
        fs::create_dir_all(dir).unwrap();
        for name in names {
            RgbImage::from_pixel(100, 80, Rgb([10, 20, 30])).save(dir.join(name)).unwrap();
        }
    }

    fn config(root: &Path) -> CropConfig {
        CropConfig {
            input_dir: root.join("in"),
            output_dir: root.join("out"),
            ..CropConfig::default()
        }
    }

    #[test]
    fn test_cells_inside_cross_are_excluded() {
        let tmp = TempDir::new().unwrap();
        write_images(&tmp.path().join("in"), &["a.bmp"]);
        let mut detector = ScriptedDetector::new(vec![vec![
            det("Cross", 0.0, 0.0, 40.0, 40.0),
            det("U87", 10.0, 10.0, 30.0, 30.0),
            det("U87", 50.0, 10.0, 70.0, 30.0),
            det("NHA", 60.0, 50.0, 90.0, 70.0),
            det("Debris", 0.0, 60.0, 10.0, 70.0),
        ]]);

        let report = extract_cells(&config(tmp.path()), &mut detector).unwrap();
        assert_eq!(report.images, 1);
        assert_eq!(report.excluded, 1);
        assert_eq!(report.saved["U87"], 1);
        assert_eq!(report.saved["NHA"], 1);

        let out = tmp.path().join("out");
        let u87 = image::open(out.join("U87/U87_0001.bmp")).unwrap();
        assert_eq!(u87.dimensions(), (20, 20));
        let nha = image::open(out.join("NHA/NHA_0001.bmp")).unwrap();
        assert_eq!(nha.dimensions(), (30, 20));
        assert!(!out.join("U87/U87_0002.bmp").exists());
    }

    #[test]
    fn test_counters_continue_across_images() {
        let tmp = TempDir::new().unwrap();
        write_images(&tmp.path().join("in"), &["b.bmp", "a.bmp", "skip.png"]);
        let mut detector = ScriptedDetector::new(vec![
            vec![det("U87", 0.0, 0.0, 10.0, 10.0), det("U87", 20.0, 20.0, 30.0, 30.0)],
            vec![det("U87", 5.0, 5.0, 15.0, 15.0), det("NHA", 40.0, 40.0, 50.0, 50.0)],
        ]);

        let report = extract_cells(&config(tmp.path()), &mut detector).unwrap();
        assert_eq!(report.images, 2);
        assert_eq!(detector.calls, 2);
        assert_eq!(report.saved["U87"], 3);
        assert_eq!(report.saved["NHA"], 1);

        let u87: Vec<String> = report
            .files
            .iter()
            .filter(|p| p.parent().unwrap().ends_with("U87"))
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(u87, vec!["U87_0001.bmp", "U87_0002.bmp", "U87_0003.bmp"]);
    }

    #[test]
    fn test_empty_crop_does_not_consume_counter() {
        let tmp = TempDir::new().unwrap();
        write_images(&tmp.path().join("in"), &["a.bmp"]);
        let mut detector = ScriptedDetector::new(vec![vec![
            det("U87", 150.0, 10.0, 180.0, 30.0),
            det("U87", -20.0, 10.0, 10.0, 30.0),
        ]]);

        let report = extract_cells(&config(tmp.path()), &mut detector).unwrap();
        assert_eq!(report.empty, 1);
        assert_eq!(report.saved["U87"], 1);

        let crop = image::open(tmp.path().join("out/U87/U87_0001.bmp")).unwrap();
        assert_eq!(crop.dimensions(), (10, 20));
    }

    #[test]
    fn test_output_directories_created_in_advance() {
        let tmp = TempDir::new().unwrap();
        write_images(&tmp.path().join("in"), &[]);
        let mut detector = ScriptedDetector::new(Vec::new());
        let report = extract_cells(&config(tmp.path()), &mut detector).unwrap();
        assert_eq!(report.total_saved(), 0);
        assert!(tmp.path().join("out/U87").is_dir());
        assert!(tmp.path().join("out/NHA").is_dir());
    }
}
