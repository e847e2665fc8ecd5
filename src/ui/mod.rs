pub mod app;
pub mod state;

pub use app::ConsoleApp;
pub use state::AppState;
