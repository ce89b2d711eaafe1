use std::path::Path;

use ort::session::{Session, builder::GraphOptimizationLevel};

/// 加载ONNX格式的YOLO模型，并应用优化配置。
///
/// # 参数
/// * `model_path` - 模型文件路径
///
/// # 错误处理
/// 如果模型加载失败会返回Err
pub fn load_model(model_path: impl AsRef<Path>) -> Result<Session, ort::Error> {
    let model = Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_intra_threads(4)?
        .commit_from_file(model_path)?;
    Ok(model)
}

/// 读取模型元数据中的类别名
///
/// 导出的YOLO模型在自定义元数据 `names` 中以 `{0: 'Cross', 1: 'U87'}` 形式保存类别名。
pub fn model_class_names(model: &Session) -> Option<Vec<String>> {
    let metadata = model.metadata().ok()?;
    let raw = metadata.custom("names").ok()??;
    parse_class_names(&raw)
}

/// 解析 `{0: 'a', 1: 'b'}` 形式的类别名表
pub fn parse_class_names(raw: &str) -> Option<Vec<String>> {
    let body = raw.trim().strip_prefix('{')?.strip_suffix('}')?;
    let mut pairs = Vec::new();
    for entry in body.split(',') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        let (id, name) = entry.split_once(':')?;
        let id: usize = id.trim().parse().ok()?;
        let name = name.trim().trim_matches(|c| c == '\'' || c == '"');
        pairs.push((id, name.to_string()));
    }
    pairs.sort_by_key(|(id, _)| *id);
    // 类别号必须连续
    if pairs.iter().enumerate().any(|(i, (id, _))| i != *id) {
        return None;
    }
    Some(pairs.into_iter().map(|(_, name)| name).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_exported_names_table() {
        let names = parse_class_names("{0: 'Cross', 2: 'NHA', 1: 'U87'}").unwrap();
        assert_eq!(names, vec!["Cross", "U87", "NHA"]);
    }

    #[test]
    fn rejects_gaps_and_garbage() {
        assert!(parse_class_names("{0: 'a', 2: 'b'}").is_none());
        assert!(parse_class_names("['a', 'b']").is_none());
    }
}
