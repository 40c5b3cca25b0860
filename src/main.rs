mod api;
mod backend;
mod config;
mod conversation;
mod i18n;
mod layout;
mod transcript;

use iced::{
    widget::{button, column, container, row, scrollable, text, text_input, Space},
    widget::text::{LineHeight, Wrapping},
    time, Border, Element, Length, Padding, Size, Subscription, Task, Theme,
    window,
};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use api::{ApiError, ChatClient};
use backend::{BackendSupervisor, LaunchReport};
use conversation::{Conversation, ResponseStatus};
use i18n::I18n;
use layout::{BubbleLayout, Measurer, BODY_FONT, TAG_FONT};
use transcript::{Author, TranscriptRow};

const OUTER_PADDING: f32 = 10.0;
const SPINNER_FRAMES: [&str; 10] = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];

fn init_tracing() {
    let filter = EnvFilter::try_from_env("BUBBLECHAT_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

fn main() -> iced::Result {
    init_tracing();

    let config = config::Config::load();
    let window_config = config.window.clone();

    iced::application(App::title, App::update, App::view)
        .theme(App::theme)
        .subscription(App::subscription)
        .window(window::Settings {
            size: Size::new(window_config.width as f32, window_config.height as f32),
            min_size: Some(Size::new(
                window_config.min_width as f32,
                window_config.min_height as f32,
            )),
            position: window::Position::Centered,
            exit_on_close_request: false,
            ..Default::default()
        })
        .default_font(BODY_FONT)
        .run_with(move || App::new(config))
}

#[derive(Debug, Clone)]
enum Message {
    InputChanged(String),
    Submit,
    ReplyReceived(Result<Option<String>, ApiError>),
    BackendLaunched(LaunchReport),
    Resized(Size),
    Tick,
    CloseRequested,
    Exit,
}

struct App {
    conversation: Conversation,
    layout: BubbleLayout<Measurer>,
    client: Option<ChatClient>,
    supervisor: Option<BackendSupervisor>,
    i18n: I18n,
    input_text: String,
    input_id: text_input::Id,
    transcript_id: scrollable::Id,
    container_width: f32,
    spinner_frame: usize,
    backend_status: Option<String>,
}

impl App {
    fn new(config: config::Config) -> (Self, Task<Message>) {
        let i18n = I18n::detect(config.locale.as_deref());
        tracing::debug!("using locale {}", i18n.locale());

        let backend = &config.backend;
        let client = match ChatClient::new(
            &backend.url,
            &backend.chat_path,
            Duration::from_secs(backend.request_timeout_secs),
        ) {
            Ok(client) => {
                tracing::debug!("chat backend at {}", client.base_url());
                Some(client)
            }
            Err(e) => {
                tracing::error!("could not build HTTP client: {}", e);
                None
            }
        };

        let supervisor = match BackendSupervisor::new(backend.clone()) {
            Ok(supervisor) => Some(supervisor),
            Err(e) => {
                tracing::error!("could not build backend supervisor: {}", e);
                None
            }
        };

        let input_id = text_input::Id::unique();
        let mut tasks = vec![text_input::focus(input_id.clone())];

        let mut backend_status = None;
        if let Some(supervisor) = supervisor.clone() {
            if backend.auto_start {
                backend_status = Some(i18n.t("backend.starting"));
            }
            tasks.push(Task::perform(
                async move { supervisor.start().await },
                Message::BackendLaunched,
            ));
        }

        let app = App {
            conversation: Conversation::new(),
            layout: BubbleLayout::from_config(config.layout.clone()),
            client,
            supervisor,
            i18n,
            input_text: String::new(),
            input_id,
            transcript_id: scrollable::Id::unique(),
            container_width: config.window.width as f32 - 2.0 * OUTER_PADDING,
            spinner_frame: 0,
            backend_status,
        };

        (app, Task::batch(tasks))
    }

    fn title(&self) -> String {
        self.i18n.t("app.title")
    }

    fn update(&mut self, message: Message) -> Task<Message> {
        match message {
            Message::InputChanged(value) => {
                self.input_text = value;
                Task::none()
            }
            Message::Submit => {
                if !self.conversation.send_enabled() {
                    return Task::none();
                }
                let Some(sent) = self.conversation.submit(&self.input_text) else {
                    return Task::none();
                };
                self.input_text.clear();
                self.spinner_frame = 0;
                self.relayout();

                let request = match self.client.clone() {
                    Some(client) => {
                        let text = sent.text().to_string();
                        Task::perform(
                            async move { client.send(&text).await },
                            Message::ReplyReceived,
                        )
                    }
                    None => Task::done(Message::ReplyReceived(Err(ApiError::Unavailable))),
                };

                Task::batch([request, self.scroll_to_end()])
            }
            Message::ReplyReceived(outcome) => {
                self.conversation.resolve(outcome, &self.i18n);
                self.relayout();
                Task::batch([
                    self.scroll_to_end(),
                    text_input::focus(self.input_id.clone()),
                ])
            }
            Message::BackendLaunched(report) => {
                self.backend_status = match report {
                    LaunchReport::Started => Some(self.i18n.t("backend.started")),
                    LaunchReport::Failed(reason) => {
                        Some(self.i18n.format("backend.failed", &[("detail", reason.as_str())]))
                    }
                    LaunchReport::Disabled | LaunchReport::AlreadyRunning => None,
                };
                Task::none()
            }
            Message::Resized(size) => {
                self.container_width = size.width - 2.0 * OUTER_PADDING;
                self.relayout();
                Task::none()
            }
            Message::Tick => {
                if !self.conversation.send_enabled() {
                    self.spinner_frame = (self.spinner_frame + 1) % SPINNER_FRAMES.len();
                }
                Task::none()
            }
            Message::CloseRequested => match self.supervisor.clone() {
                Some(supervisor) => Task::perform(
                    async move { supervisor.stop().await },
                    |_| Message::Exit,
                ),
                None => Task::done(Message::Exit),
            },
            Message::Exit => iced::exit(),
        }
    }

    fn relayout(&mut self) {
        self.layout.apply(
            self.container_width,
            self.conversation.transcript_mut(),
            &self.i18n,
        );
    }

    fn scroll_to_end(&self) -> Task<Message> {
        scrollable::snap_to(self.transcript_id.clone(), scrollable::RelativeOffset::END)
    }

    fn subscription(&self) -> Subscription<Message> {
        let spinner = if self.conversation.send_enabled() {
            Subscription::none()
        } else {
            time::every(Duration::from_millis(90)).map(|_| Message::Tick)
        };

        Subscription::batch([
            spinner,
            window::resize_events().map(|(_id, size)| Message::Resized(size)),
            window::close_requests().map(|_id| Message::CloseRequested),
        ])
    }

    fn view(&self) -> Element<Message> {
        let layout = self.layout.config();
        let transcript = self.conversation.transcript();

        let rows = column(transcript.rows().iter().map(|entry| self.view_row(entry)))
            .spacing(layout.row_spacing)
            .height(Length::Fixed(transcript.content_height()));

        // The scrollbar and its spacing together take up the scrollbar reserve.
        let scrollbar = scrollable::Scrollbar::new()
            .width(layout.scrollbar_reserve / 2.0)
            .scroller_width(layout.scrollbar_reserve / 2.0)
            .spacing(layout.scrollbar_reserve / 2.0);

        let transcript = scrollable(
            container(rows).padding(Padding::from([0.0, layout.container_padding / 2.0])),
        )
        .id(self.transcript_id.clone())
        .direction(scrollable::Direction::Vertical(scrollbar))
        .width(Length::Fill)
        .height(Length::Fill);

        let send_enabled = self.conversation.send_enabled();
        let (placeholder, send_label) = if send_enabled {
            (self.i18n.t("input.placeholder"), self.i18n.t("send.idle"))
        } else {
            (self.i18n.t("input.busy"), self.i18n.t("send.busy"))
        };

        let mut input = text_input(&placeholder, &self.input_text)
            .on_input(Message::InputChanged)
            .padding(12)
            .size(16)
            .id(self.input_id.clone());
        if send_enabled {
            input = input.on_submit(Message::Submit);
        }

        let send = button(text(send_label).size(16))
            .padding(12)
            .on_press_maybe(send_enabled.then_some(Message::Submit));

        let response_status = self.conversation.status();
        let spinner = match response_status {
            ResponseStatus::Pending => SPINNER_FRAMES[self.spinner_frame % SPINNER_FRAMES.len()],
            _ => "",
        };
        let status_line = row![
            text(spinner).size(14),
            text(response_status.label(&self.i18n)).size(12),
        ]
        .spacing(6);

        let mut content = column![transcript, status_line]
            .spacing(10)
            .padding(OUTER_PADDING);
        if let Some(status) = &self.backend_status {
            content = content.push(text(status.as_str()).size(12));
        }
        content = content.push(row![input, send].spacing(10));

        container(content)
            .width(Length::Fill)
            .height(Length::Fill)
            .into()
    }

    fn view_row<'a>(&'a self, entry: &'a TranscriptRow) -> Element<'a, Message> {
        let layout = self.layout.config();
        let geometry = entry.geometry();
        let author = entry.message().author();

        let tag = text(self.i18n.author(author))
            .size(layout.tag_size)
            .line_height(LineHeight::Relative(layout.line_height))
            .wrapping(Wrapping::WordOrGlyph)
            .font(TAG_FONT);
        let body = text(entry.message().text())
            .size(layout.font_size)
            .line_height(LineHeight::Relative(layout.line_height))
            .wrapping(Wrapping::WordOrGlyph)
            .font(BODY_FONT);
        let stamp = text(entry.message().timestamp())
            .size(layout.footer_size)
            .line_height(LineHeight::Relative(layout.line_height))
            .wrapping(Wrapping::WordOrGlyph)
            .font(BODY_FONT)
            .style(|theme: &Theme| text::Style {
                color: Some(theme.extended_palette().background.strong.color),
            });

        let bubble = container(column![tag, body, stamp])
            .padding(Padding::from([
                layout.bubble_padding_y / 2.0,
                layout.bubble_padding_x / 2.0,
            ]))
            .width(Length::Fixed(geometry.width))
            .height(Length::Fixed(geometry.height))
            .style(move |theme: &Theme| bubble_style(theme, author));

        row![Space::with_width(Length::Fixed(geometry.x)), bubble]
            .width(Length::Fixed(geometry.row_width))
            .height(Length::Fixed(geometry.height))
            .into()
    }

    fn theme(&self) -> Theme {
        Theme::TokyoNight
    }
}

fn bubble_style(theme: &Theme, author: Author) -> container::Style {
    let palette = theme.extended_palette();
    let (pair, border) = match author {
        Author::User => (palette.primary.weak, palette.primary.strong.color),
        Author::Assistant => (palette.background.weak, palette.background.strong.color),
    };

    container::Style {
        text_color: Some(pair.text),
        background: Some(pair.color.into()),
        border: Border {
            color: border,
            width: 1.0,
            radius: 10.0.into(),
        },
        ..Default::default()
    }
}
