use async_channel::{Receiver, Sender};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tab {
    Book,
    Requests,
    Current,
    History,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Level {
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub level: Level,
    pub message: String,
}

/// What the presentation layer is asked to do.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    TabChanged(Tab),
    Notify(Notification),
}

/// Sending half of the event stream. Events are dropped once the receiver
/// is gone.
#[derive(Clone, Debug)]
pub struct Outbox {
    tx: Sender<Event>,
}

impl Outbox {
    pub fn channel() -> (Self, Receiver<Event>) {
        let (tx, rx) = async_channel::unbounded();

        (Self { tx }, rx)
    }

    pub fn emit(&self, event: Event) {
        if self.tx.try_send(event).is_err() {
            tracing::debug!("event receiver closed");
        }
    }

    pub fn notify(&self, level: Level, message: impl Into<String>) {
        self.emit(Event::Notify(Notification {
            level,
            message: message.into(),
        }));
    }

    pub fn switch_to(&self, tab: Tab) {
        self.emit(Event::TabChanged(tab));
    }
}

#[test]
fn events_arrive_in_order() {
    let (outbox, rx) = Outbox::channel();

    outbox.switch_to(Tab::Current);
    outbox.notify(Level::Success, "Driver Assigned");

    assert_eq!(rx.try_recv().unwrap(), Event::TabChanged(Tab::Current));
    assert_eq!(
        rx.try_recv().unwrap(),
        Event::Notify(Notification {
            level: Level::Success,
            message: "Driver Assigned".into(),
        })
    );
    assert!(rx.try_recv().is_err());

    drop(rx);
    outbox.notify(Level::Info, "nobody listening");
}
