//! 予測ベクトルからの認識結果の決定

use serde::Serialize;

use crate::labels::LabelTable;

/// 認識結果のインデックス
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Resolution {
    /// 最も確率の高いクラス
    pub primary: Option<usize>,
    /// `primary` を除いた上位候補（確率の降順）
    pub guesses: Vec<usize>,
}

/// ラベル表で解決した認識結果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedLabels<'a> {
    pub primary: Option<&'a str>,
    pub guesses: Vec<&'a str>,
}

impl Resolution {
    /// インデックスをラベル名に変換（範囲外は表示しない）
    pub fn labels<'a>(&self, table: &'a LabelTable) -> ResolvedLabels<'a> {
        ResolvedLabels {
            primary: self.primary.and_then(|i| table.get(i)),
            guesses: self.guesses.iter().filter_map(|&i| table.get(i)).collect(),
        }
    }
}

/// 最大値のインデックス
///
/// 同値の場合は先頭を返します。NaN は選ばれません。
pub fn arg_max(probs: &[f32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (i, &p) in probs.iter().enumerate() {
        if p.is_nan() {
            continue;
        }
        match best {
            Some((_, b)) if p <= b => {}
            _ => best = Some((i, p)),
        }
    }
    best.map(|(i, _)| i)
}

/// `exclude` を除いた上位 `n` 件のインデックス（確率の降順、同値はインデックス昇順）
pub fn top_guesses(probs: &[f32], exclude: Option<usize>, n: usize) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..probs.len())
        .filter(|&i| Some(i) != exclude && !probs[i].is_nan())
        .collect();
    // 安定ソートなので同値はインデックス順のまま
    indices.sort_by(|&a, &b| probs[b].total_cmp(&probs[a]));
    indices.truncate(n);
    indices
}

/// 予測ベクトルから認識結果を決定
pub fn resolve(probs: &[f32], additional_guesses: usize) -> Resolution {
    let primary = arg_max(probs);
    let guesses = match primary {
        Some(_) => top_guesses(probs, primary, additional_guesses),
        None => Vec::new(),
    };
    Resolution { primary, guesses }
}
