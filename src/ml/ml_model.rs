//! スケッチ分類用の多層パーセプトロン
//!
//! `[batch, width, height, 1]` の入力を平坦化し、全結合層 + ReLU を重ねて
//! クラスごとのロジットを出力します。

use burn::{
    config::Config,
    module::Module,
    nn::{Linear, LinearConfig, Relu},
    tensor::{activation::softmax, backend::Backend, Tensor},
};

/// モデル設定
#[derive(Config, Debug)]
pub struct SketchMlpConfig {
    /// 入力の第1軸
    pub input_width: usize,
    /// 入力の第2軸
    pub input_height: usize,
    /// 隠れ層のユニット数
    pub hidden_sizes: Vec<usize>,
    /// 分類クラス数
    pub num_classes: usize,
}

impl SketchMlpConfig {
    /// モデルを初期化
    pub fn init<B: Backend>(&self, device: &B::Device) -> SketchMlp<B> {
        let mut units_in = self.input_width * self.input_height;
        let mut hidden = Vec::with_capacity(self.hidden_sizes.len());
        for &units in &self.hidden_sizes {
            hidden.push(LinearConfig::new(units_in, units).init(device));
            units_in = units;
        }

        log::debug!(
            "[SketchMlp] {}x{} -> {:?} -> {}",
            self.input_width,
            self.input_height,
            self.hidden_sizes,
            self.num_classes
        );

        SketchMlp {
            hidden,
            output: LinearConfig::new(units_in, self.num_classes).init(device),
            activation: Relu::new(),
        }
    }

    /// 全結合層ごとの重み形状 `[in, out]`
    pub fn layer_shapes(&self) -> Vec<[usize; 2]> {
        let mut units_in = self.input_width * self.input_height;
        let mut shapes = Vec::with_capacity(self.hidden_sizes.len() + 1);
        for &units in self.hidden_sizes.iter().chain([self.num_classes].iter()) {
            shapes.push([units_in, units]);
            units_in = units;
        }
        shapes
    }
}

/// スケッチ分類用MLP
///
/// # アーキテクチャ
/// - Flatten: `[batch, w, h, 1]` -> `[batch, w * h]`
/// - {Linear + ReLU} x 隠れ層数
/// - Linear -> num_classes
/// - Softmax (予測時)
#[derive(Module, Debug)]
pub struct SketchMlp<B: Backend> {
    hidden: Vec<Linear<B>>,
    output: Linear<B>,
    activation: Relu,
}

impl<B: Backend> SketchMlp<B> {
    /// 順伝播
    ///
    /// # 引数
    /// - `images`: バッチ画像 `[batch_size, width, height, 1]`
    ///
    /// # 戻り値
    /// - クラスごとのロジット `[batch_size, num_classes]`
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let [batch_size, width, height, channels] = images.dims();
        let mut x = images.reshape([batch_size, width * height * channels]);

        for layer in &self.hidden {
            x = self.activation.forward(layer.forward(x));
        }

        self.output.forward(x)
    }

    /// 実際に保持している重みの形状 `[in, out]`（出力層を含む）
    pub fn layer_shapes(&self) -> Vec<[usize; 2]> {
        self.hidden
            .iter()
            .chain(std::iter::once(&self.output))
            .map(|layer| layer.weight.dims())
            .collect()
    }

    /// クラスごとの確率 `[batch_size, num_classes]`
    pub fn predict(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        softmax(self.forward(images), 1)
    }
}
