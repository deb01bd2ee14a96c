use super::with_messenger;
use crate::{ContentType, Error, Message};
use std::ops::ControlFlow;
use uuid::Uuid;

fn unique(name: &str) -> String {
    format!("courier-test-{}-{}", name, Uuid::new_v4())
}

#[test]
fn test_send_and_receive() {
    with_messenger(|url, messenger| {
        let address = format!("{}/{}", url, unique("roundtrip"));
        let subscription = messenger.subscribe(&address).unwrap();

        messenger
            .put(
                Message::new("<test>hello</test>")
                    .with_address(address.as_str())
                    .with_content_type(ContentType::APPLICATION_XML)
                    .with_subject("greeting"),
            )
            .unwrap();
        let ids = messenger.send().unwrap();
        assert_eq!(ids.len(), 1);
        assert_eq!(messenger.outgoing(), 0);

        let mut received = Vec::new();
        subscription
            .listen(|message| {
                received.push(message);
                Ok(ControlFlow::Break(()))
            })
            .unwrap();
        subscription.close().unwrap();

        assert_eq!(received.len(), 1);
        assert_eq!(received[0].body_text(), "<test>hello</test>");
        assert_eq!(received[0].subject(), Some("greeting"));
        assert_eq!(received[0].id(), Some(ids[0].as_str()));
    })
}

#[test]
fn test_send_reuses_connection() {
    with_messenger(|url, messenger| {
        let address = format!("{}/{}", url, unique("reuse"));
        messenger.subscribe(&address).unwrap().close().unwrap();

        for i in 0..3 {
            messenger
                .put(Message::new(format!("echo {}", i)).with_address(address.as_str()))
                .unwrap();
        }
        let ids = messenger.send().unwrap();
        assert_eq!(ids.len(), 3);

        let prefix = ids[0].rsplit_once('_').unwrap().0;
        assert!(ids.iter().all(|id| id.starts_with(prefix)));
    })
}

#[test]
fn test_unroutable() {
    with_messenger(|url, messenger| {
        let address = format!("{}/{}", url, unique("missing"));
        messenger
            .put(Message::new("lost").with_address(address.as_str()))
            .unwrap();
        match messenger.send() {
            Err(Error::Unroutable { reply_code, .. }) => assert_eq!(reply_code, 312),
            other => panic!("unexpected result {:?}", other),
        }
        assert_eq!(messenger.outgoing(), 1);
    })
}

#[test]
fn test_routed_subscription() {
    with_messenger(|url, messenger| {
        let routing_key = unique("routed");
        let address = format!("{}/amq.direct/{}", url, routing_key);
        let subscription = messenger.subscribe(&address).unwrap();
        assert!(subscription.queue().starts_with("amq.gen-"));

        messenger
            .put(Message::new("routed").with_address(address.as_str()))
            .unwrap();
        messenger.send().unwrap();

        let mut bodies = Vec::new();
        subscription
            .listen(|message| {
                bodies.push(message.body_text().into_owned());
                Ok(ControlFlow::Break(()))
            })
            .unwrap();
        assert_eq!(bodies, vec!["routed".to_string()]);
    })
}
