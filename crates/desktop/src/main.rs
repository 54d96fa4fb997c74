mod app;
mod player_view;
mod settings;

use app::App;

fn main() -> iced::Result {
    env_logger::init();

    iced::application(App::new, App::update, App::view)
        .title("Face Overlay")
        .subscription(App::subscription)
        .window(iced::window::Settings {
            size: iced::Size::new(680.0, 560.0),
            ..Default::default()
        })
        .run()
}
