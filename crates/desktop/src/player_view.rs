use iced::widget::image::Handle;
use iced::widget::{container, image, stack, text};
use iced::{ContentFit, Element, Length};

use faceoverlay_core::pipeline::sync_loop::{LoopState, LoopStats};
use faceoverlay_core::shared::geometry::Size;

use crate::app::Message;

/// Video frame with the overlay stacked on top. Both layers are stretched
/// to exactly `size`, so overlay pixels land on the video pixels they
/// annotate.
pub fn display<'a>(
    size: Size,
    frame: Option<Handle>,
    overlay: Option<Handle>,
) -> Element<'a, Message> {
    let width = Length::Fixed(size.width as f32);
    let height = Length::Fixed(size.height as f32);

    let video: Element<'a, Message> = match frame {
        Some(handle) => image(handle)
            .width(width)
            .height(height)
            .content_fit(ContentFit::Fill)
            .into(),
        None => container(text("No video loaded").size(14))
            .center_x(width)
            .center_y(height)
            .into(),
    };

    match overlay {
        Some(handle) => stack![
            video,
            image(handle)
                .width(width)
                .height(height)
                .content_fit(ContentFit::Fill)
        ]
        .width(width)
        .height(height)
        .into(),
        None => video,
    }
}

pub fn status_line(state: LoopState, stats: Option<&LoopStats>) -> String {
    let failed = stats.and_then(|s| s.last_error.as_ref());
    match state {
        LoopState::Idle => "Choose a video to start.".to_string(),
        LoopState::Loading => match failed {
            Some(e) => format!("Face detection unavailable: {e}"),
            None => "Loading face detection models...".to_string(),
        },
        LoopState::Running => {
            let drawn = stats.map_or(0, |s| s.cycles_drawn);
            let dropped = stats.map_or(0, |s| s.ticks_dropped);
            format!("Detecting faces: {drawn} updates, {dropped} skipped ticks")
        }
        LoopState::Stopped => "Stopped.".to_string(),
    }
}
