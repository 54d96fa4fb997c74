use std::path::PathBuf;
use std::time::Duration;

use iced::widget::image::Handle;
use iced::widget::{button, column, container, row, slider, text};
use iced::{Element, Length, Subscription, Task};

use faceoverlay_core::detection::domain::detection_engine::share;
use faceoverlay_core::detection::infrastructure::model_resolver::ModelLocation;
use faceoverlay_core::detection::infrastructure::onnx_face_engine::OnnxFaceEngine;
use faceoverlay_core::overlay::domain::overlay_renderer::{OverlayRenderer, OverlayStyle};
use faceoverlay_core::overlay::infrastructure::raster_surface::{
    system_font, OverlayView, RasterSurface,
};
use faceoverlay_core::pipeline::player_shell::{PlayerConfig, PlayerShell};
use faceoverlay_core::shared::constants::VIDEO_EXTENSIONS;
use faceoverlay_core::video::infrastructure::ffmpeg_frame_source::FfmpegMediaOpener;

use crate::player_view;
use crate::settings::Settings;

/// ~30 Hz; only re-uploads images whose content changed.
const REFRESH_INTERVAL: Duration = Duration::from_millis(33);

#[derive(Debug, Clone)]
pub enum Message {
    ChooseFile,
    FileChosen(Option<PathBuf>),
    TogglePlayPause,
    Refresh,
    ConfidenceChanged(u32),
    IntervalChanged(u32),
}

/// A player plus the read side of its overlay surface.
struct Player {
    shell: PlayerShell,
    overlay: OverlayView,
}

impl Player {
    fn build(settings: &Settings) -> Self {
        let config = PlayerConfig {
            tick_interval: settings.tick_interval(),
            ..PlayerConfig::default()
        };
        let location = match &settings.model_dir {
            Some(dir) => ModelLocation::default().with_bundled_dir(dir),
            None => ModelLocation::default(),
        };
        let engine =
            OnnxFaceEngine::new(location).with_confidence(settings.confidence_threshold());

        let surface = match system_font() {
            Some(font) => RasterSurface::new(config.display).with_label_font(font),
            None => {
                log::warn!("No system font found; score labels are disabled");
                RasterSurface::new(config.display)
            }
        };
        let overlay = surface.view();
        let renderer = OverlayRenderer::new(Box::new(surface), OverlayStyle::default());
        let shell = PlayerShell::new(
            Box::new(FfmpegMediaOpener),
            share(Box::new(engine)),
            renderer,
            config,
        );
        Self { shell, overlay }
    }
}

pub struct App {
    settings: Settings,
    player: Player,
    /// Settings changed since the player was built.
    settings_dirty: bool,
    frame: Option<((u64, usize), Handle)>,
    overlay: Option<(u64, Handle)>,
    error: Option<String>,
}

impl App {
    pub fn new() -> (Self, Task<Message>) {
        let settings = Settings::load();
        let player = Player::build(&settings);
        (
            Self {
                settings,
                player,
                settings_dirty: false,
                frame: None,
                overlay: None,
                error: None,
            },
            Task::none(),
        )
    }

    pub fn update(&mut self, message: Message) -> Task<Message> {
        match message {
            Message::ChooseFile => {
                return Task::perform(
                    async {
                        rfd::AsyncFileDialog::new()
                            .set_title("Choose a video")
                            .add_filter("Video Files", VIDEO_EXTENSIONS)
                            .pick_file()
                            .await
                            .map(|h| h.path().to_path_buf())
                    },
                    Message::FileChosen,
                );
            }
            Message::FileChosen(Some(path)) => {
                if self.settings_dirty {
                    self.player = Player::build(&self.settings);
                    self.settings_dirty = false;
                }
                self.frame = None;
                self.error = match self.player.shell.choose_file(&path) {
                    Ok(_) => None,
                    Err(e) => {
                        log::warn!("{e}");
                        Some(e.to_string())
                    }
                };
                self.refresh();
            }
            Message::FileChosen(None) => {}
            Message::TogglePlayPause => {
                self.player.shell.toggle_play_pause();
            }
            Message::Refresh => self.refresh(),
            Message::ConfidenceChanged(val) => {
                self.settings.confidence = val;
                self.settings_dirty = true;
                self.settings.save();
            }
            Message::IntervalChanged(val) => {
                self.settings.tick_interval_ms = u64::from(val);
                self.settings_dirty = true;
                self.settings.save();
            }
        }
        Task::none()
    }

    /// Pulls the newest video frame and overlay into image handles.
    fn refresh(&mut self) {
        let shell = &self.player.shell;
        match (shell.source(), shell.current_frame()) {
            (Some(source), Some(frame)) => {
                let key = (source.id(), frame.index());
                if self.frame.as_ref().map(|(k, _)| *k) != Some(key) {
                    let handle = Handle::from_rgba(frame.width(), frame.height(), frame.to_rgba());
                    self.frame = Some((key, handle));
                }
            }
            (None, _) => self.frame = None,
            (Some(_), None) => {}
        }

        let generation = self.player.overlay.generation();
        if self.overlay.as_ref().map(|(g, _)| *g) != Some(generation) {
            let (generation, image) = self.player.overlay.snapshot();
            let (w, h) = image.dimensions();
            self.overlay = Some((generation, Handle::from_rgba(w, h, image.into_raw())));
        }
    }

    pub fn view(&self) -> Element<'_, Message> {
        let shell = &self.player.shell;
        let has_source = shell.source().is_some();

        let play_label = if shell.is_playing() { "Pause" } else { "Play" };
        let controls = row![
            button(text("Choose File")).on_press(Message::ChooseFile),
            button(text(play_label)).on_press_maybe(has_source.then_some(Message::TogglePlayPause)),
        ]
        .spacing(8);

        let display = player_view::display(
            shell.config().display,
            self.frame.as_ref().map(|(_, h)| h.clone()),
            self.overlay.as_ref().map(|(_, h)| h.clone()),
        );

        let status = text(player_view::status_line(shell.state(), shell.stats().as_ref())).size(13);

        let mut content = column![controls, display, status].spacing(12);
        if let Some(error) = &self.error {
            content = content.push(text(format!("Could not open video: {error}")).size(13));
        }
        content = content.push(self.settings_view());

        container(content)
            .padding(16)
            .width(Length::Fill)
            .height(Length::Fill)
            .into()
    }

    fn settings_view(&self) -> Element<'_, Message> {
        let s = &self.settings;
        let mut col = column![
            text(format!("Confidence: {}%", s.confidence)).size(13),
            slider(10..=95, s.confidence, Message::ConfidenceChanged),
            text(format!("Detection interval: {} ms", s.tick_interval_ms)).size(13),
            slider(
                20..=500,
                s.tick_interval_ms.min(500) as u32,
                Message::IntervalChanged
            ),
        ]
        .spacing(6)
        .width(Length::Fixed(320.0));
        if self.settings_dirty {
            col = col.push(text("Applies to the next file you choose.").size(11));
        }
        col.into()
    }

    pub fn subscription(&self) -> Subscription<Message> {
        if self.player.shell.source().is_some() {
            iced::time::every(REFRESH_INTERVAL).map(|_| Message::Refresh)
        } else {
            Subscription::none()
        }
    }
}
