//! Dispatcher behavior: admission, command routing, wildcard fan-out,
//! argument slicing, and error isolation.

mod common;

use std::sync::Arc;

use common::{ChannelTransport, RecordingHandler, text_event};
use sup::allowlist::{AllowList, AllowedEntry};
use sup::dispatch::Dispatcher;
use sup::registry::HandlerRegistry;

const USER: &str = "user@host";

fn allow_user(jid: &str) -> AllowList {
    AllowList::new(&[], &[AllowedEntry::new(jid)])
}

fn dispatcher(registry: Arc<HandlerRegistry>, transport: Arc<ChannelTransport>) -> Dispatcher {
    Dispatcher::new(registry, transport, allow_user(USER), ".sup")
}

#[tokio::test]
async fn non_command_fires_only_wildcard() {
    let registry = Arc::new(HandlerRegistry::new());
    let ping = RecordingHandler::new("ping", &["ping"]);
    let star = RecordingHandler::new("star", &["*"]);
    registry.register(ping.clone()).unwrap();
    registry.register(star.clone()).unwrap();

    let transport = ChannelTransport::new();
    dispatcher(registry, transport)
        .dispatch(text_event(USER, "hello"))
        .await;

    assert_eq!(star.call_count(), 1);
    assert_eq!(star.call_args(), vec!["hello"]);
    assert_eq!(ping.call_count(), 0);
}

#[tokio::test]
async fn command_fires_topic_handler_and_wildcard() {
    let registry = Arc::new(HandlerRegistry::new());
    let ping = RecordingHandler::new("ping", &["ping"]);
    let star = RecordingHandler::new("star", &["*"]);
    registry.register(ping.clone()).unwrap();
    registry.register(star.clone()).unwrap();

    let transport = ChannelTransport::new();
    dispatcher(registry, transport)
        .dispatch(text_event(USER, ".sup ping"))
        .await;

    assert_eq!(ping.call_count(), 1);
    // Wildcard subscribers see the full original body.
    assert_eq!(star.call_args(), vec![".sup ping"]);
}

#[tokio::test]
async fn non_allow_listed_sender_reaches_nothing() {
    let registry = Arc::new(HandlerRegistry::new());
    let ping = RecordingHandler::new("ping", &["ping"]);
    let star = RecordingHandler::new("star", &["*"]);
    registry.register(ping.clone()).unwrap();
    registry.register(star.clone()).unwrap();

    let transport = ChannelTransport::new();
    dispatcher(registry, transport)
        .dispatch(text_event("stranger@host", ".sup ping"))
        .await;

    assert_eq!(ping.call_count(), 0);
    assert_eq!(star.call_count(), 0);
}

#[tokio::test]
async fn empty_allow_list_denies_everyone() {
    let registry = Arc::new(HandlerRegistry::new());
    let star = RecordingHandler::new("star", &["*"]);
    registry.register(star.clone()).unwrap();

    let transport = ChannelTransport::new();
    Dispatcher::new(registry, transport, AllowList::default(), ".sup")
        .dispatch(text_event(USER, "hello"))
        .await;

    assert_eq!(star.call_count(), 0);
}

#[tokio::test]
async fn command_args_are_tail_after_command_name() {
    let registry = Arc::new(HandlerRegistry::new());
    let echo = RecordingHandler::new("echo", &["echo"]);
    registry.register(echo.clone()).unwrap();

    let transport = ChannelTransport::new();
    dispatcher(registry, transport)
        .dispatch(text_event(USER, ".sup echo  one   two "))
        .await;

    assert_eq!(echo.call_args(), vec!["one two"]);
}

#[tokio::test]
async fn bare_trigger_routes_to_help_topic() {
    let registry = Arc::new(HandlerRegistry::new());
    let help = RecordingHandler::new("helper", &["help"]);
    registry.register(help.clone()).unwrap();

    let transport = ChannelTransport::new();
    dispatcher(registry, transport)
        .dispatch(text_event(USER, ".sup"))
        .await;

    assert_eq!(help.call_count(), 1);
}

#[tokio::test]
async fn unknown_command_fires_nothing_but_wildcard() {
    let registry = Arc::new(HandlerRegistry::new());
    let ping = RecordingHandler::new("ping", &["ping"]);
    let star = RecordingHandler::new("star", &["*"]);
    registry.register(ping.clone()).unwrap();
    registry.register(star.clone()).unwrap();

    let transport = ChannelTransport::new();
    dispatcher(registry, transport)
        .dispatch(text_event(USER, ".sup frobnicate"))
        .await;

    assert_eq!(ping.call_count(), 0);
    assert_eq!(star.call_count(), 1);
}

#[tokio::test]
async fn command_fires_every_subscriber_of_the_topic() {
    let registry = Arc::new(HandlerRegistry::new());
    let first = RecordingHandler::new("first", &["shared"]);
    let second = RecordingHandler::new("second", &["shared"]);
    let other = RecordingHandler::new("other", &["different"]);
    registry.register(first.clone()).unwrap();
    registry.register(second.clone()).unwrap();
    registry.register(other.clone()).unwrap();

    let transport = ChannelTransport::new();
    dispatcher(registry, transport)
        .dispatch(text_event(USER, ".sup shared"))
        .await;

    assert_eq!(first.call_count(), 1);
    assert_eq!(second.call_count(), 1);
    assert_eq!(other.call_count(), 0);
}

#[tokio::test]
async fn one_failing_handler_does_not_suppress_siblings() {
    let registry = Arc::new(HandlerRegistry::new());
    let bad = RecordingHandler::failing("bad", &["t"]);
    let good = RecordingHandler::with_reply("good", &["t"], "done");
    registry.register(bad.clone()).unwrap();
    registry.register(good.clone()).unwrap();

    let transport = ChannelTransport::new();
    dispatcher(registry, transport.clone())
        .dispatch(text_event(USER, ".sup t"))
        .await;

    assert_eq!(bad.call_count(), 1);
    assert_eq!(good.call_count(), 1);
    assert_eq!(
        transport.texts(),
        vec![(USER.to_string(), "done".to_string())]
    );
}

#[tokio::test]
async fn reply_goes_to_originating_chat() {
    let registry = Arc::new(HandlerRegistry::new());
    let star = RecordingHandler::with_reply("star", &["*"], "seen");
    registry.register(star.clone()).unwrap();

    let transport = ChannelTransport::new();
    dispatcher(registry, transport.clone())
        .dispatch(text_event(USER, "anything"))
        .await;

    assert_eq!(
        transport.texts(),
        vec![(USER.to_string(), "seen".to_string())]
    );
}

#[tokio::test]
async fn media_message_reaches_wildcard_with_empty_body() {
    use sup::message::{ChatId, MediaRef, MessageBody, MessageEvent, SenderId};

    let registry = Arc::new(HandlerRegistry::new());
    let star = RecordingHandler::new("star", &["*"]);
    registry.register(star.clone()).unwrap();

    let event = MessageEvent {
        id: "m".to_string(),
        chat: ChatId::user(USER),
        sender: SenderId::new(USER),
        push_name: String::new(),
        timestamp: 0,
        body: MessageBody::Image(MediaRef {
            id: "media-1".to_string(),
            mime_type: "image/png".to_string(),
            file_name: None,
            size: None,
        }),
    };

    let transport = ChannelTransport::new();
    dispatcher(registry, transport)
        .dispatch(event)
        .await;

    assert_eq!(star.call_args(), vec![""]);
}
