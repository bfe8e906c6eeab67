pub mod cameras;
pub mod path_events;
pub mod settings;
pub mod users;

pub use cameras::CamerasRepository;
pub use path_events::PathEventsRepository;
pub use settings::SettingsRepository;
pub use users::UsersRepository;
