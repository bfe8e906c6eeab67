pub mod camera_models;
pub mod path_event_models;
pub mod settings_models;
pub mod user_models;

pub use camera_models::{Camera, ClassFilter, DeviceFilter, DeviceRecord};
pub use path_event_models::{PathEvent, PathSample};
pub use settings_models::VideoSettings;
pub use user_models::{Identity, Role, User, UserRole};
