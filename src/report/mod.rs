mod display;
mod overlay;
mod plot;

pub use display::{Control, HeadlessPresenter, Presenter, WindowPresenter};
pub use overlay::draw_overlay;
pub use plot::render_plot;
