use celldet::config::SplitConfig;
use celldet::dataset::DatasetDescriptor;
use celldet::split_dataset;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

#[cfg(test)]
mod tests {
    use super::*;

    /// 生成 `count` 张图像，`unlabeled` 中的序号不写标签
    fn fixture(root: &Path, count: usize, unlabeled: &[usize]) -> (PathBuf, PathBuf) {
        let images = root.join("raw/images");
        let labels = root.join("raw/labels");
        fs::create_dir_all(&images).unwrap();
        fs::create_dir_all(&labels).unwrap();
        for i in 0..count {
            fs::write(images.join(format!("File_{i}.bmp")), b"bmp").unwrap();
            if !unlabeled.contains(&i) {
                fs::write(labels.join(format!("File_{i}.txt")), "1 0.5 0.5 0.1 0.1\n").unwrap();
            }
        }
        // 其他扩展名不参与划分
        fs::write(images.join("notes.txt"), b"x").unwrap();
        (images, labels)
    }

    fn names_in(dir: &Path) -> HashSet<String> {
        fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect()
    }

    fn config(root: &Path, images: PathBuf, labels: PathBuf, seed: u64) -> SplitConfig {
        SplitConfig {
            images,
            labels,
            output: root.join("dataset"),
            seed: Some(seed),
            ..SplitConfig::default()
        }
    }

    #[test]
    fn test_split_sizes_and_disjointness() {
        let tmp = TempDir::new().unwrap();
        let (images, labels) = fixture(tmp.path(), 10, &[]);
        let report = split_dataset(&config(tmp.path(), images, labels, 42)).unwrap();

        assert_eq!(report.train.len(), 8);
        assert_eq!(report.val.len(), 2);
        assert_eq!(report.copied_train, 8);
        assert_eq!(report.copied_val, 2);

        let out = tmp.path().join("dataset");
        let train_images = names_in(&out.join("images/train"));
        let val_images = names_in(&out.join("images/val"));
        assert_eq!(train_images.len(), 8);
        assert_eq!(val_images.len(), 2);
        assert!(train_images.is_disjoint(&val_images));
        assert_eq!(names_in(&out.join("labels/train")).len(), 8);

        for name in &val_images {
            let stem = name.trim_end_matches(".bmp");
            assert!(out.join("labels/val").join(format!("{stem}.txt")).exists());
        }
    }

    #[test]
    fn test_missing_labels_are_skipped() {
        let tmp = TempDir::new().unwrap();
        let (images, labels) = fixture(tmp.path(), 5, &[1, 3]);
        let report = split_dataset(&config(tmp.path(), images, labels, 7)).unwrap();

        assert_eq!(report.train.len(), 4);
        assert_eq!(report.val.len(), 1);
        assert_eq!(report.missing_labels.len(), 2);
        assert_eq!(report.copied_train + report.copied_val, 3);

        let out = tmp.path().join("dataset");
        let mut copied = names_in(&out.join("images/train"));
        copied.extend(names_in(&out.join("images/val")));
        let expected: HashSet<String> = ["File_0.bmp", "File_2.bmp", "File_4.bmp"]
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(copied, expected);
    }

    #[test]
    fn test_seed_makes_split_reproducible() {
        let tmp = TempDir::new().unwrap();
        let (images, labels) = fixture(tmp.path(), 12, &[]);
        let first = split_dataset(&config(tmp.path(), images.clone(), labels.clone(), 3)).unwrap();
        let second = split_dataset(&config(tmp.path(), images, labels, 3)).unwrap();
        assert_eq!(first.train, second.train);
        assert_eq!(first.val, second.val);
    }

    #[test]
    fn test_descriptor_written_when_names_given() {
        let tmp = TempDir::new().unwrap();
        let (images, labels) = fixture(tmp.path(), 3, &[]);
        let mut cfg = config(tmp.path(), images, labels, 1);
        cfg.names = vec!["Cross".into(), "U87".into(), "NHA".into()];
        split_dataset(&cfg).unwrap();

        let descriptor = DatasetDescriptor::load(cfg.output.join("data.toml")).unwrap();
        assert_eq!(descriptor.names, cfg.names);
        assert!(descriptor.train_dir().is_dir());
        assert!(descriptor.val_dir().is_dir());
    }

    #[test]
    fn test_dotted_stem_keeps_its_own_label() {
        let tmp = TempDir::new().unwrap();
        let images = tmp.path().join("raw/images");
        let labels = tmp.path().join("raw/labels");
        fs::create_dir_all(&images).unwrap();
        fs::create_dir_all(&labels).unwrap();
        fs::write(images.join("File_1.v2.bmp"), b"bmp").unwrap();
        fs::write(labels.join("File_1.v2.txt"), "2 0.5 0.5 0.2 0.2\n").unwrap();
        // 同名前缀的另一份标签不能被错配
        fs::write(labels.join("File_1.txt"), "0 0.1 0.1 0.1 0.1\n").unwrap();

        let mut cfg = config(tmp.path(), images, labels, 9);
        cfg.train_ratio = 1.0;
        let report = split_dataset(&cfg).unwrap();

        assert!(report.missing_labels.is_empty());
        assert_eq!(report.copied_train, 1);
        let out = tmp.path().join("dataset/labels/train");
        assert_eq!(names_in(&out), HashSet::from(["File_1.v2.txt".to_string()]));
        assert_eq!(fs::read_to_string(out.join("File_1.v2.txt")).unwrap(), "2 0.5 0.5 0.2 0.2\n");
    }

    #[test]
    fn test_missing_dotted_label_is_not_replaced_by_prefix() {
        let tmp = TempDir::new().unwrap();
        let images = tmp.path().join("raw/images");
        let labels = tmp.path().join("raw/labels");
        fs::create_dir_all(&images).unwrap();
        fs::create_dir_all(&labels).unwrap();
        fs::write(images.join("File_1.v2.bmp"), b"bmp").unwrap();
        fs::write(labels.join("File_1.txt"), "0 0.1 0.1 0.1 0.1\n").unwrap();

        let mut cfg = config(tmp.path(), images.clone(), labels, 9);
        cfg.train_ratio = 1.0;
        let report = split_dataset(&cfg).unwrap();

        assert_eq!(report.copied_train, 0);
        assert_eq!(report.missing_labels, vec![images.join("File_1.v2.bmp")]);
        assert!(names_in(&tmp.path().join("dataset/labels/train")).is_empty());
    }

    #[test]
    fn test_invalid_ratio_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let (images, labels) = fixture(tmp.path(), 3, &[]);
        let mut cfg = config(tmp.path(), images, labels, 1);
        cfg.train_ratio = -0.1;
        assert!(split_dataset(&cfg).is_err());
    }
}
