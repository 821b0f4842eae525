//! kaiseki: EDINET 開示書類の取り込みと解析のコアライブラリ。
//!
//! 構成は4系統。取り込み (`edinet` + `batch`)、抽出 (`extraction`)、
//! 解析 (`sentiment` + `finance` + `insights`)、そしてそれらを束ねる
//! セッション機械 (`analysis`)。永続化はすべて `db` を経由する。

pub mod analysis;
pub mod api;
pub mod batch;
pub mod db;
pub mod edinet;
pub mod extraction;
pub mod finance;
pub mod insights;
pub mod logging;
pub mod normalize;
pub mod sentiment;
pub mod timezone;
