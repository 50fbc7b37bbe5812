mod backend;
mod classify;
mod config;
mod language;
mod logging;
mod monitor;
mod session;
#[cfg(test)]
mod test_support;
mod transcript;

use futures_util::stream::{self, Stream};
use iced::{
    widget::{
        button, column, container, horizontal_space, row, scrollable, text, text_input,
        text_input::Id, Column,
    },
    Element, Length, Task, Theme, Subscription, Color, Border,
    time, clipboard,
    keyboard::{self, Key},
    event::{self, Event as IcedEvent},
    alignment, Padding,
    window,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use monitor::ConnectionStatus;
use session::{Session, SessionSettings, SessionState, SubmitOutcome};
use transcript::{ChatMessage, Role, SAMPLE_QUESTIONS};

const TITLE: &str = "HSC বাংলা সাহিত্য AI সহায়ক";
const SUBTITLE: &str = "HSC Bangla Literature AI Assistant";
const PLACEHOLDER: &str = "আপনার প্রশ্ন লিখুন / Type your question...";

fn main() -> iced::Result {
    logging::init();
    let config = config::Config::load();

    iced::application(TITLE, App::update, App::view)
        .theme(App::theme)
        .subscription(App::subscription)
        .window(window_settings(&config.window))
        .run_with(move || App::new(config))
}

/// Close requests are routed through `Message::Exit` so the session is shut
/// down before the window goes away.
fn window_settings(config: &config::WindowConfig) -> window::Settings {
    window::Settings {
        size: iced::Size::new(config.width as f32, config.height as f32),
        min_size: Some(iced::Size::new(config.min_width as f32, config.min_height as f32)),
        position: window::Position::Centered,
        exit_on_close_request: false,
        ..Default::default()
    }
}

/// Put a question the session refused back into an input the user has not
/// started editing again.
fn restore_refused_question(input: &mut String, question: String, outcome: &SubmitOutcome) {
    if *outcome == SubmitOutcome::Ignored && input.is_empty() {
        *input = question;
    }
}

#[derive(Debug, Clone)]
enum Message {
    InputChanged(String),
    Submit,
    SampleChosen(&'static str),
    SessionUpdated(SessionState),
    Finished(String, SubmitOutcome),
    Started,
    Tick,
    CopyAnswer,
    Exit,
}

struct App {
    session: Session,
    state: SessionState,
    input_text: String,
    loading_frame: usize,
    input_id: Id,
    scroll_id: scrollable::Id,
}

/// Forward every published session state to the UI.
fn session_updates(rx: watch::Receiver<SessionState>) -> impl Stream<Item = Message> {
    stream::unfold(rx, |mut rx| async move {
        rx.changed().await.ok()?;
        let state = rx.borrow_and_update().clone();
        Some((Message::SessionUpdated(state), rx))
    })
}

fn bubble_style(role: Role, is_error: bool) -> impl Fn(&Theme) -> container::Style {
    move |theme: &Theme| {
        let palette = theme.extended_palette();
        let (background, text_color, border_color) = match (role, is_error) {
            (Role::User, _) => (
                palette.primary.strong.color,
                palette.primary.strong.text,
                palette.primary.strong.color,
            ),
            (Role::Assistant, true) => (
                palette.danger.weak.color,
                palette.danger.weak.text,
                palette.danger.strong.color,
            ),
            (Role::Assistant, false) => (
                palette.background.weak.color,
                palette.background.weak.text,
                palette.background.strong.color,
            ),
        };

        container::Style {
            background: Some(background.into()),
            text_color: Some(text_color),
            border: Border {
                color: border_color,
                width: 1.0,
                radius: 8.0.into(),
            },
            ..container::Style::default()
        }
    }
}

fn message_bubble(message: &ChatMessage) -> Element<'static, Message> {
    let mut body = column![text(message.content.clone()).size(15)].spacing(8);
    if let Some(meta) = message.meta_line() {
        body = body.push(text(meta).size(12));
    }

    let bubble = container(body)
        .padding(12)
        .max_width(640)
        .style(bubble_style(message.role, message.is_error));

    let horizontal = match message.role {
        Role::User => alignment::Horizontal::Right,
        Role::Assistant => alignment::Horizontal::Left,
    };

    let entry = column![bubble, text(message.time_label()).size(11)]
        .spacing(4)
        .align_x(horizontal);

    container(entry)
        .width(Length::Fill)
        .align_x(horizontal)
        .into()
}

fn status_color(status: ConnectionStatus) -> Color {
    match status {
        ConnectionStatus::Checking => Color::from_rgb(0.9, 0.75, 0.3),
        ConnectionStatus::Connected => Color::from_rgb(0.4, 0.8, 0.45),
        ConnectionStatus::Disconnected => Color::from_rgb(0.9, 0.35, 0.35),
    }
}

impl App {
    fn new(config: config::Config) -> (Self, Task<Message>) {
        let backend = Arc::new(backend::HttpBackend::new(config.backend.url.clone()));
        let session = Session::new(backend, SessionSettings::from(&config.backend));

        let input_id = Id::unique();

        let app = App {
            state: session.snapshot(),
            session: session.clone(),
            input_text: String::new(),
            loading_frame: 0,
            input_id: input_id.clone(),
            scroll_id: scrollable::Id::unique(),
        };

        // Spawned from a task so the monitor lands on the runtime's executor
        let start_task = Task::future(async move {
            session.start();
            Message::Started
        });
        let focus_task = text_input::focus(input_id);

        (app, Task::batch([start_task, focus_task]))
    }

    fn last_answer(&self) -> Option<&ChatMessage> {
        self.state
            .messages()
            .iter()
            .skip(1)
            .rev()
            .find(|m| m.role == Role::Assistant && !m.is_error)
    }

    fn update(&mut self, message: Message) -> Task<Message> {
        match message {
            Message::InputChanged(value) => {
                self.input_text = value;
                Task::none()
            }
            Message::SampleChosen(question) => {
                self.input_text = question.to_string();
                text_input::focus(self.input_id.clone())
            }
            Message::Submit => {
                if self.input_text.trim().is_empty() || self.state.is_busy() {
                    return Task::none();
                }

                let question = std::mem::take(&mut self.input_text);
                let session = self.session.clone();

                Task::future(async move {
                    let outcome = session.submit(&question).await;
                    Message::Finished(question, outcome)
                })
            }
            Message::SessionUpdated(state) => {
                let grew = state.messages().len() != self.state.messages().len();
                self.state = state;
                if grew {
                    scrollable::snap_to(self.scroll_id.clone(), scrollable::RelativeOffset::END)
                } else {
                    Task::none()
                }
            }
            Message::Finished(question, outcome) => {
                tracing::debug!(?outcome, "Exchange finished");
                restore_refused_question(&mut self.input_text, question, &outcome);
                self.state = self.session.snapshot();
                self.loading_frame = 0;
                text_input::focus(self.input_id.clone())
            }
            Message::Started => Task::none(),
            Message::Tick => {
                if self.state.is_busy() {
                    self.loading_frame = (self.loading_frame + 1) % 10;
                }
                Task::none()
            }
            Message::CopyAnswer => match self.last_answer() {
                Some(answer) => clipboard::write(answer.content.clone()),
                None => Task::none(),
            },
            Message::Exit => {
                self.session.shutdown();
                iced::exit()
            }
        }
    }

    fn subscription(&self) -> Subscription<Message> {
        let timer = if self.state.is_busy() {
            time::every(Duration::from_millis(80)).map(|_| Message::Tick)
        } else {
            Subscription::none()
        };

        let updates =
            Subscription::run_with_id("session-updates", session_updates(self.session.subscribe()));

        let events = event::listen_with(|event, _status, _id| {
            if let IcedEvent::Keyboard(keyboard::Event::KeyPressed {
                key: Key::Named(keyboard::key::Named::Escape),
                ..
            }) = event
            {
                Some(Message::Exit)
            } else {
                None
            }
        });

        let close = window::close_requests().map(|_| Message::Exit);

        Subscription::batch([timer, updates, events, close])
    }

    fn view(&self) -> Element<Message> {
        let busy = self.state.is_busy();

        let header = row![
            column![text(TITLE).size(20), text(SUBTITLE).size(13)].spacing(2),
            horizontal_space(),
            text(format!("● {}", self.state.status.label()))
                .size(13)
                .color(status_color(self.state.status)),
        ]
        .align_y(alignment::Vertical::Center)
        .padding(Padding::from([10, 15]));

        let mut transcript = Column::new().spacing(14).padding(15);
        for message in self.state.messages() {
            transcript = transcript.push(message_bubble(message));
        }
        if busy {
            let loading_frames = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];
            let spinner = loading_frames[self.loading_frame % loading_frames.len()];
            transcript = transcript.push(
                row![text(spinner).size(20), text("চিন্তা করছি... / Thinking...").size(14)]
                    .spacing(10)
                    .align_y(alignment::Vertical::Center),
            );
        }

        let transcript = scrollable(transcript)
            .id(self.scroll_id.clone())
            .height(Length::Fill);

        let mut content = column![header, transcript].spacing(6).padding(10);

        if self.state.messages().len() == 1 {
            let mut samples = column![text("নমুনা প্রশ্ন / Sample Questions").size(13)].spacing(6);
            for question in SAMPLE_QUESTIONS {
                samples = samples.push(
                    button(text(question).size(13))
                        .width(Length::Fill)
                        .padding(8)
                        .style(button::secondary)
                        .on_press_maybe((!busy).then_some(Message::SampleChosen(question))),
                );
            }
            content = content.push(container(samples).padding(Padding::from([0, 15])));
        }

        let mut input = text_input(PLACEHOLDER, &self.input_text)
            .padding(12)
            .size(16)
            .id(self.input_id.clone());
        if !busy {
            input = input
                .on_input(Message::InputChanged)
                .on_submit(Message::Submit);
        }

        let can_send = !busy && !self.input_text.trim().is_empty();
        let send = button(text("পাঠান / Send").size(15))
            .padding(12)
            .on_press_maybe(can_send.then_some(Message::Submit));

        content = content.push(row![input, send].spacing(10).padding(Padding::from([0, 15])));

        let mut footer = row![text(format!("API: {}", self.session.base_url())).size(11)]
            .align_y(alignment::Vertical::Center);
        if self.last_answer().is_some() && !busy {
            footer = footer.push(horizontal_space()).push(
                button(text("[Copy]").size(12))
                    .on_press(Message::CopyAnswer)
                    .padding(6),
            );
        }
        content = content.push(container(footer).padding(Padding::from([4, 15])));

        container(content)
            .width(Length::Fill)
            .height(Length::Fill)
            .into()
    }

    fn theme(&self) -> Theme {
        Theme::TokyoNight
    }
}
