use indicatif::ProgressStyle;

/// 计算余弦相似度，任一向量为零向量时返回 0
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let (mut dot, mut na, mut nb) = (0f32, 0f32, 0f32);
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    let norm = na.sqrt() * nb.sqrt();
    if norm == 0. { 0. } else { dot / norm }
}

/// 将向量缩放为单位长度，零向量原样返回
pub fn l2_normalize(v: &[f32]) -> Vec<f32> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm == 0. {
        return v.to_vec();
    }
    v.iter().map(|x| x / norm).collect()
}

/// 保留指定位数的小数
pub fn round_to(value: f64, digits: i32) -> f64 {
    let p = 10f64.powi(digits);
    (value * p).round() / p
}

/// 相册 ID 会用作文件名，只允许字母、数字、下划线和短横线
pub fn is_valid_collection_id(id: &str) -> bool {
    !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

pub fn pb_style() -> ProgressStyle {
    ProgressStyle::with_template(
        "[{elapsed_precise}] {bar:40.cyan/blue} {pos:>7}/{len:7} {per_sec:>10} {msg}",
    )
    .expect("invalid progress bar template")
}
