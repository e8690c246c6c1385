use std::collections::HashSet;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use amqp_runnables::rabbitmq::PublisherData;
use amqp_runnables::{AmqpConfig, Delivery};
use lapin::BasicProperties;
use tokio_util::sync::CancellationToken;

use crate::support::{eventually, factory, stop, test_config, Inbox};

#[test]
fn test_queue_messages_arrive_in_order() {
    let (broker, factory) = factory(test_config());
    let inbox = Inbox::default();

    let consumer = factory.create_queue_listener("orders", inbox.listener());
    let publisher = factory.create_queue_text_publisher("orders");
    let consumer_handle = consumer.start().unwrap();
    let publisher_handle = publisher.start().unwrap();

    let expected: Vec<String> = (0..50).map(|i| format!("order-{}", i)).collect();
    for message in &expected {
        assert!(publisher.put(message.clone()));
    }

    assert!(eventually(|| inbox.len() == expected.len()));
    assert_eq!(inbox.messages(), expected);
    assert!(eventually(|| broker.acked().len() == expected.len()));
    assert!(consumer.is_connected());
    assert!(publisher.is_connected());

    stop(publisher_handle);
    stop(consumer_handle);
    assert!(!consumer.is_running());
    assert!(!consumer.is_connected());
    assert!(!publisher.is_connected());
}

#[test]
fn test_two_publishers_two_consumers_share_the_work() {
    let (_broker, factory) = factory(test_config());
    let first_inbox = Inbox::default();
    let second_inbox = Inbox::default();

    let consumers = [
        factory.create_queue_listener("work", first_inbox.listener()),
        factory.create_queue_listener("work", second_inbox.listener()),
    ];
    let publishers = [
        factory.create_queue_text_publisher("work"),
        factory.create_queue_text_publisher("work"),
    ];

    let mut handles = Vec::new();
    for consumer in &consumers {
        handles.push(consumer.start().unwrap());
    }
    for publisher in &publishers {
        handles.push(publisher.start().unwrap());
    }

    for i in 0..100 {
        for (p, publisher) in publishers.iter().enumerate() {
            assert!(publisher.put(format!("p{}-{}", p, i)));
        }
    }

    assert!(eventually(|| first_inbox.len() + second_inbox.len() == 200));

    let mut seen = HashSet::new();
    for message in first_inbox.messages().into_iter().chain(second_inbox.messages()) {
        assert!(seen.insert(message.clone()), "{} delivered twice", message);
    }
    assert_eq!(seen.len(), 200);

    for handle in handles {
        stop(handle);
    }
}

#[test]
fn test_interrupting_one_consumer_loses_nothing() {
    let (_broker, factory) = factory(test_config());
    let first_inbox = Inbox::default();
    let second_inbox = Inbox::default();

    let first = factory.create_queue_listener("shared", first_inbox.listener());
    let second = factory.create_queue_listener("shared", second_inbox.listener());
    let publisher = factory.create_queue_text_publisher("shared");
    let first_handle = first.start().unwrap();
    let second_handle = second.start().unwrap();
    let publisher_handle = publisher.start().unwrap();

    for i in 0..100 {
        assert!(publisher.put(format!("m-{}", i)));
        if i == 50 {
            first.interrupt();
        }
    }
    first_handle.join().unwrap();

    assert!(eventually(|| first_inbox.len() + second_inbox.len() == 100));
    let mut all: Vec<String> = first_inbox.messages();
    all.extend(second_inbox.messages());
    all.sort();
    all.dedup();
    assert_eq!(all.len(), 100);

    stop(publisher_handle);
    stop(second_handle);
}

#[test]
fn test_supervisor_runs_on_the_callers_runtime() {
    let (_broker, factory) = factory(test_config());
    let inbox = Inbox::default();

    let consumer = factory.create_queue_listener("embedded", inbox.listener());
    let publisher = factory.create_queue_text_publisher("embedded");
    let supervisor = consumer.take_supervisor().unwrap();
    assert!(consumer.start().is_err());

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .enable_all()
        .build()
        .unwrap();
    let task = runtime.spawn(supervisor.run());
    let publisher_handle = publisher.start().unwrap();

    assert!(publisher.put("inline".to_string()));
    assert!(eventually(|| inbox.contains("inline")));

    consumer.interrupt();
    runtime.block_on(task).unwrap();
    assert!(!consumer.is_running());

    stop(publisher_handle);
}

#[test]
fn test_consumer_stops_when_callback_says_so() {
    let (broker, factory) = factory(test_config());
    let inbox = Inbox::default();

    let recorder = inbox.clone();
    let consumer = factory.create_queue_listener("commands", move |delivery: &Delivery| -> anyhow::Result<bool> {
        recorder.record(delivery);
        Ok(delivery.text() != "stop")
    });
    let publisher = factory.create_queue_text_publisher("commands");

    let publisher_handle = publisher.start().unwrap();
    for message in ["first", "stop", "never seen"] {
        assert!(publisher.put(message.to_string()));
    }
    assert!(eventually(|| broker.queue_depth("commands") == 3));

    let consumer_handle = consumer.start().unwrap();
    assert!(eventually(|| consumer_handle.is_finished()));
    consumer_handle.join().unwrap();

    assert_eq!(inbox.messages(), vec!["first", "stop"]);
    assert!(!consumer.is_running());
    assert!(!consumer.is_connected());
    assert_eq!(broker.acked().len(), 2);
    assert_eq!(broker.queue_depth("commands"), 1);

    stop(publisher_handle);
}

#[test]
fn test_blocked_put_resumes_once_publisher_drains() {
    let config = AmqpConfig {
        publisher_queue_length: 1,
        ..test_config()
    };
    let (_broker, factory) = factory(config);
    let inbox = Inbox::default();

    let consumer = factory.create_queue_listener("slow", inbox.listener());
    let publisher = Arc::new(factory.create_queue_text_publisher("slow"));

    assert!(publisher.offer("first".to_string()));
    assert!(!publisher.offer("overflow".to_string()));
    assert_eq!(publisher.remaining_capacity(), 0);

    let producer = {
        let publisher = Arc::clone(&publisher);
        thread::spawn(move || publisher.put("second".to_string()))
    };
    thread::sleep(Duration::from_millis(100));
    assert!(!producer.is_finished());

    let consumer_handle = consumer.start().unwrap();
    let publisher_handle = publisher.start().unwrap();

    assert!(producer.join().unwrap());
    assert!(eventually(|| inbox.len() == 2));
    assert_eq!(inbox.messages(), vec!["first", "second"]);

    stop(publisher_handle);
    stop(consumer_handle);
}

#[test]
fn test_interrupt_releases_a_blocked_put() {
    let config = AmqpConfig {
        publisher_queue_length: 1,
        ..test_config()
    };
    let (_broker, factory) = factory(config);
    let publisher = Arc::new(factory.create_queue_text_publisher("stuck"));
    assert!(publisher.offer("first".to_string()));

    let producer = {
        let publisher = Arc::clone(&publisher);
        thread::spawn(move || publisher.put("second".to_string()))
    };
    thread::sleep(Duration::from_millis(50));
    publisher.interrupt();

    assert!(!producer.join().unwrap());
    assert_eq!(publisher.len(), 1);
}

#[test]
fn test_caller_token_releases_a_blocked_put() {
    let config = AmqpConfig {
        publisher_queue_length: 1,
        ..test_config()
    };
    let (_broker, factory) = factory(config);
    let inbox = Inbox::default();
    let consumer = factory.create_queue_listener("cancellable", inbox.listener());
    let publisher = Arc::new(factory.create_queue_text_publisher("cancellable"));
    assert!(publisher.offer("first".to_string()));

    let cancel = CancellationToken::new();
    let producer = {
        let publisher = Arc::clone(&publisher);
        let cancel = cancel.clone();
        thread::spawn(move || publisher.put_until("second".to_string(), &cancel))
    };
    thread::sleep(Duration::from_millis(50));
    assert!(!producer.is_finished());
    cancel.cancel();

    assert!(!producer.join().unwrap());
    assert_eq!(publisher.len(), 1);
    assert!(!publisher.put_until("third".to_string(), &cancel));

    // Only the caller's token fired; the publisher itself still works.
    let consumer_handle = consumer.start().unwrap();
    let publisher_handle = publisher.start().unwrap();
    assert!(publisher.put_until("fourth".to_string(), &CancellationToken::new()));
    assert!(eventually(|| inbox.len() == 2));
    assert_eq!(inbox.messages(), vec!["first", "fourth"]);

    stop(publisher_handle);
    stop(consumer_handle);
}

#[test]
fn test_offer_gives_up_after_timeout() {
    let config = AmqpConfig {
        publisher_queue_length: 1,
        transmit_timeout_ms: 100,
        ..test_config()
    };
    let (_broker, factory) = factory(config);
    let publisher = factory.create_queue_text_publisher("full");
    assert!(publisher.offer("first".to_string()));

    let started = Instant::now();
    assert!(!publisher.offer_with_timeout("second".to_string()));
    let waited = started.elapsed();
    assert!(waited >= Duration::from_millis(90), "gave up after {:?}", waited);

    assert!(!publisher.offer_timeout("third".to_string(), Duration::from_millis(20)));
    assert_eq!(publisher.len(), 1);
}

#[test]
fn test_publisher_callback_controls_the_message() {
    let (broker, factory) = factory(test_config());
    let inbox = Inbox::default();

    let consumer = factory.create_queue_listener("numbers", inbox.listener());
    let publisher = factory.create_queue_publisher::<u32, _>("numbers", |n: &u32| -> anyhow::Result<Option<PublisherData>> {
        if n % 2 == 1 {
            return Ok(None);
        }
        let message = PublisherData::new(BasicProperties::default(), n.to_string().into_bytes());
        Ok(Some(if *n == 6 { message.unhealthy() } else { message }))
    });

    let consumer_handle = consumer.start().unwrap();
    let publisher_handle = publisher.start().unwrap();
    for n in 0..10u32 {
        assert!(publisher.put(n));
    }

    // The unhealthy message is still sent, then the publisher stops for good.
    assert!(eventually(|| publisher_handle.is_finished()));
    publisher_handle.join().unwrap();
    assert!(!publisher.is_running());
    assert!(!publisher.is_connected());
    assert_eq!(publisher.len(), 3);

    assert!(eventually(|| inbox.len() == 4));
    assert_eq!(inbox.messages(), vec!["0", "2", "4", "6"]);
    assert_eq!(broker.connections_opened(), 2);

    stop(consumer_handle);
}

#[test]
fn test_empty_text_is_delivered() {
    let (_broker, factory) = factory(test_config());
    let inbox = Inbox::default();

    let consumer = factory.create_queue_listener("blanks", inbox.listener());
    let publisher = factory.create_queue_text_publisher("blanks");
    let consumer_handle = consumer.start().unwrap();
    let publisher_handle = publisher.start().unwrap();

    assert!(publisher.put(String::new()));
    assert!(publisher.put("after".to_string()));

    assert!(eventually(|| inbox.len() == 2));
    assert_eq!(inbox.messages(), vec!["", "after"]);

    stop(publisher_handle);
    stop(consumer_handle);
}

#[test]
fn test_prefetch_is_requested_on_connect() {
    let config = AmqpConfig {
        prefetch_count: 10,
        ..test_config()
    };
    let (broker, factory) = factory(config);
    let consumer = factory.create_queue_listener("prefetched", Inbox::default().listener());

    let handle = consumer.start().unwrap();
    assert!(eventually(|| consumer.is_connected()));
    assert_eq!(broker.qos_requests(), vec![10]);
    stop(handle);
}

#[test]
fn test_existing_queue_is_used_when_not_declaring() {
    let config = AmqpConfig {
        declaring: false,
        ..test_config()
    };
    let (broker, factory) = factory(config);
    broker.create_queue("provisioned");
    let inbox = Inbox::default();

    let consumer = factory.create_queue_listener("provisioned", inbox.listener());
    let publisher = factory.create_queue_text_publisher("provisioned");
    let consumer_handle = consumer.start().unwrap();
    let publisher_handle = publisher.start().unwrap();

    assert!(publisher.put("hello".to_string()));
    assert!(eventually(|| inbox.contains("hello")));
    assert_eq!(broker.declare_count(), 0);

    stop(publisher_handle);
    stop(consumer_handle);
}

#[test]
fn test_runnable_starts_only_once() {
    let (_broker, factory) = factory(test_config());
    let publisher = factory.create_queue_text_publisher("once");

    let handle = publisher.start().unwrap();
    assert!(publisher.start().is_err());
    stop(handle);
}
