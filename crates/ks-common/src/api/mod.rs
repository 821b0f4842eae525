pub mod analysis;

pub use analysis::{
    ProgressResponse, ResultResponse, StartAnalysisRequest, StartAnalysisResponse,
};
