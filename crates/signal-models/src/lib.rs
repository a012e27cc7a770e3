pub mod ewrls;
pub mod features;
pub mod horizon;
pub mod predictors;
pub mod regime;
pub mod sigor;
pub mod williams_rsi;

pub use ewrls::EwrlsPredictor;
pub use features::FeatureExtractor;
pub use horizon::{HorizonPredictor, MultiHorizonPrediction};
pub use predictors::SymbolPredictor;
pub use regime::RegimeFeatures;
pub use sigor::{SigorConfig, SigorSignal, SigorStrategy};
pub use williams_rsi::{WilliamsRsiConfig, WilliamsRsiSignal, WilliamsRsiStrategy};
