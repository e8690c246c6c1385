use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use amqp_runnables::{AmqpConfig, Delivery};

use crate::support::{eventually, factory, stop, test_config, Inbox};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Reading {
    sensor: String,
    value: f64,
}

#[test]
fn test_exchange_fans_out_to_every_listener() {
    let (broker, factory) = factory(test_config());
    let left = Inbox::default();
    let right = Inbox::default();

    let listeners = [
        factory.create_exchange_listener("events", left.listener()),
        factory.create_exchange_listener("events", right.listener()),
    ];
    let publisher = factory.create_exchange_text_publisher("events");

    let mut handles: Vec<_> = listeners.iter().map(|l| l.start().unwrap()).collect();
    handles.push(publisher.start().unwrap());
    // Messages sent before a listener has bound its queue are not routed to it.
    assert!(eventually(|| listeners.iter().all(|l| l.is_connected())));

    for i in 0..10 {
        assert!(publisher.put(format!("event-{}", i)));
    }

    let expected: Vec<String> = (0..10).map(|i| format!("event-{}", i)).collect();
    assert!(eventually(|| left.len() == 10 && right.len() == 10));
    assert_eq!(left.messages(), expected);
    assert_eq!(right.messages(), expected);
    assert_eq!(broker.exchange_kind("events").as_deref(), Some("fanout"));

    for handle in handles {
        stop(handle);
    }
}

#[test]
fn test_exchange_type_comes_from_config() {
    let config = AmqpConfig {
        exchange_type: "topic".to_string(),
        ..test_config()
    };
    let (broker, factory) = factory(config);
    let listener = factory.create_exchange_listener("audit", Inbox::default().listener());

    let handle = listener.start().unwrap();
    assert!(eventually(|| listener.is_connected()));
    assert_eq!(broker.exchange_kind("audit").as_deref(), Some("topic"));
    assert!(broker.has_queue("amq.gen-1"));
    stop(handle);
}

#[test]
fn test_json_publisher_on_exchange() {
    let (_broker, factory) = factory(test_config());
    let inbox = Inbox::default();
    let content_types = Arc::new(Mutex::new(Vec::new()));

    let recorder = inbox.clone();
    let types = Arc::clone(&content_types);
    let listener = factory.create_exchange_listener("readings", move |delivery: &Delivery| -> anyhow::Result<bool> {
        let content_type = delivery.properties.content_type().as_ref().map(|ct| ct.as_str().to_string());
        types.lock().unwrap().push(content_type);
        recorder.record(delivery);
        Ok(true)
    });
    let publisher = factory.create_exchange_json_publisher::<Reading>("readings");

    let listener_handle = listener.start().unwrap();
    let publisher_handle = publisher.start().unwrap();
    assert!(eventually(|| listener.is_connected()));

    let reading = Reading {
        sensor: "boiler".to_string(),
        value: 81.5,
    };
    assert!(publisher.put(reading.clone()));

    assert!(eventually(|| inbox.len() == 1));
    let received: Reading = serde_json::from_str(&inbox.messages()[0]).unwrap();
    assert_eq!(received, reading);
    assert_eq!(*content_types.lock().unwrap(), vec![Some("application/json".to_string())]);

    stop(publisher_handle);
    stop(listener_handle);
}

#[test]
fn test_queue_json_publisher() {
    let (_broker, factory) = factory(test_config());
    let inbox = Inbox::default();

    let listener = factory.create_queue_listener("readings-queue", inbox.listener());
    let publisher = factory.create_queue_json_publisher::<Reading>("readings-queue");
    let listener_handle = listener.start().unwrap();
    let publisher_handle = publisher.start().unwrap();

    for value in [1.0, 2.5] {
        assert!(publisher.put(Reading {
            sensor: "attic".to_string(),
            value,
        }));
    }

    assert!(eventually(|| inbox.len() == 2));
    let values: Vec<f64> = inbox
        .messages()
        .iter()
        .map(|m| serde_json::from_str::<Reading>(m).unwrap().value)
        .collect();
    assert_eq!(values, vec![1.0, 2.5]);

    stop(publisher_handle);
    stop(listener_handle);
}
