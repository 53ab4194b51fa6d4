//! End-to-end publish/subscribe over an in-process overlay.

use semcan::api::EventCloud;
use semcan::config::OverlayConfig;
use semcan::core::{Node, Quadruple};
use semcan::pubsub::{ChannelSink, Notification, NotificationKind, NotificationPayload};
use semcan::Error;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

const FOAF: &str = "http://xmlns.com/foaf/0.1/";

const FOAF_SUBSCRIPTION: &str = "PREFIX foaf: <http://xmlns.com/foaf/0.1/>
SELECT ?name ?email WHERE { GRAPH ?g { ?id foaf:name ?name . ?id foaf:email ?email } }";

fn person(event: u32, name: &str, email: &str) -> Vec<Quadruple> {
    let graph = Node::iri(format!("http://example.org/event/{}", event));
    let id = Node::iri(format!("http://example.org/person/{}", event));
    vec![
        Quadruple::new(
            graph.clone(),
            id.clone(),
            Node::iri(format!("{}name", FOAF)),
            Node::literal(name),
        ),
        Quadruple::new(graph, id, Node::iri(format!("{}email", FOAF)), Node::literal(email)),
    ]
}

async fn next(receiver: &mut UnboundedReceiver<Notification>) -> Notification {
    tokio::time::timeout(Duration::from_secs(5), receiver.recv())
        .await
        .expect("no notification within 5s")
        .expect("sink closed")
}

async fn assert_silent(receiver: &mut UnboundedReceiver<Notification>) {
    assert!(tokio::time::timeout(Duration::from_millis(400), receiver.recv()).await.is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_name_and_email_reconstructed_into_one_binding() {
    let cloud = EventCloud::start(OverlayConfig::default()).unwrap();
    let (sink, mut notifications) = ChannelSink::new();
    let id = cloud
        .peer(0)
        .unwrap()
        .subscribe(FOAF_SUBSCRIPTION, NotificationKind::Binding, Arc::new(sink))
        .await
        .unwrap();

    cloud
        .peer(7)
        .unwrap()
        .publish_batch(person(1, "Alice", "alice@example.org"))
        .await
        .unwrap();

    let notification = next(&mut notifications).await;
    assert_eq!(notification.id.subscription, id);
    let NotificationPayload::Binding(binding) = notification.payload else {
        panic!("expected a binding")
    };
    assert_eq!(binding.len(), 2);
    assert_eq!(binding.get("name"), Some(&Node::literal("Alice")));
    assert_eq!(binding.get("email"), Some(&Node::literal("alice@example.org")));
    assert_silent(&mut notifications).await;
    cloud.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_each_event_is_notified_once() {
    let cloud = EventCloud::start(OverlayConfig::default()).unwrap();
    let (sink, mut notifications) = ChannelSink::new();
    cloud
        .peer(2)
        .unwrap()
        .subscribe(FOAF_SUBSCRIPTION, NotificationKind::Binding, Arc::new(sink))
        .await
        .unwrap();

    for event in 0..5 {
        let publisher = cloud.random_peer();
        let quads = person(event, &format!("Person{}", event), &format!("p{}@example.org", event));
        publisher.publish_batch(quads).await.unwrap();
    }

    let mut names = Vec::new();
    for _ in 0..5 {
        let NotificationPayload::Binding(binding) = next(&mut notifications).await.payload else {
            panic!("expected a binding")
        };
        names.push(binding["name"].lexical_form().to_string());
    }
    names.sort();
    assert_eq!(names, (0..5).map(|i| format!("Person{}", i)).collect::<Vec<_>>());
    assert_silent(&mut notifications).await;
    cloud.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_compound_event_carries_contributing_quadruples() {
    let cloud = EventCloud::start(OverlayConfig::default()).unwrap();
    let (sink, mut notifications) = ChannelSink::new();
    cloud
        .peer(1)
        .unwrap()
        .subscribe(FOAF_SUBSCRIPTION, NotificationKind::CompoundEvent, Arc::new(sink))
        .await
        .unwrap();

    let quads: Vec<Quadruple> = person(3, "Carol", "carol@example.org")
        .into_iter()
        .map(|q| q.with_publication_time(10))
        .collect();
    cloud.peer(4).unwrap().publish_batch(quads.clone()).await.unwrap();

    let NotificationPayload::CompoundEvent(received) = next(&mut notifications).await.payload else {
        panic!("expected a compound event")
    };
    assert_eq!(received, quads);
    cloud.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_signal_kind_needs_no_solution() {
    let cloud = EventCloud::start(OverlayConfig::default()).unwrap();
    let (sink, mut notifications) = ChannelSink::new();
    let id = cloud
        .peer(5)
        .unwrap()
        .subscribe(FOAF_SUBSCRIPTION, NotificationKind::Signal, Arc::new(sink))
        .await
        .unwrap();

    cloud.peer(0).unwrap().publish_batch(person(4, "Dave", "dave@example.org")).await.unwrap();
    let notification = next(&mut notifications).await;
    assert_eq!(notification.id.subscription, id);
    assert_eq!(notification.payload, NotificationPayload::Signal);
    assert_silent(&mut notifications).await;
    cloud.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_filters_select_matching_events() {
    let cloud = EventCloud::start(OverlayConfig::default()).unwrap();
    let (sink, mut notifications) = ChannelSink::new();
    cloud
        .peer(0)
        .unwrap()
        .subscribe(
            "PREFIX foaf: <http://xmlns.com/foaf/0.1/>
             SELECT ?name ?email WHERE { GRAPH ?g {
                 ?id foaf:name ?name . ?id foaf:email ?email
                 FILTER (?name >= \"M\")
             } }",
            NotificationKind::Binding,
            Arc::new(sink),
        )
        .await
        .unwrap();

    cloud.peer(3).unwrap().publish_batch(person(5, "Bob", "bob@example.org")).await.unwrap();
    cloud.peer(3).unwrap().publish_batch(person(6, "Zoe", "zoe@example.org")).await.unwrap();

    let NotificationPayload::Binding(binding) = next(&mut notifications).await.payload else {
        panic!("expected a binding")
    };
    assert_eq!(binding.get("name"), Some(&Node::literal("Zoe")));
    assert_silent(&mut notifications).await;
    cloud.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cross_pattern_filter_checked_after_join() {
    let cloud = EventCloud::start(OverlayConfig::default()).unwrap();
    let (sink, mut notifications) = ChannelSink::new();
    cloud
        .peer(0)
        .unwrap()
        .subscribe(
            "PREFIX foaf: <http://xmlns.com/foaf/0.1/>
             SELECT ?name WHERE { GRAPH ?g {
                 ?id foaf:name ?name . ?id foaf:nick ?nick
                 FILTER (?name >= \"M\" || ?nick >= \"M\")
             } }",
            NotificationKind::Binding,
            Arc::new(sink),
        )
        .await
        .unwrap();

    let publish = |event: u32, name: &str, nick: &str| {
        let graph = Node::iri(format!("http://example.org/event/{}", event));
        let id = Node::iri("http://example.org/person");
        vec![
            Quadruple::new(
                graph.clone(),
                id.clone(),
                Node::iri(format!("{}name", FOAF)),
                Node::literal(name),
            ),
            Quadruple::new(graph, id, Node::iri(format!("{}nick", FOAF)), Node::literal(nick)),
        ]
    };
    cloud.peer(1).unwrap().publish_batch(publish(20, "Eve", "Evie")).await.unwrap();
    cloud.peer(1).unwrap().publish_batch(publish(21, "Frank", "Tank")).await.unwrap();

    let NotificationPayload::Binding(binding) = next(&mut notifications).await.payload else {
        panic!("expected a binding")
    };
    assert_eq!(binding.get("name"), Some(&Node::literal("Frank")));
    assert_silent(&mut notifications).await;
    cloud.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_single_pattern_subscription() {
    let cloud = EventCloud::start(OverlayConfig::default()).unwrap();
    let (sink, mut notifications) = ChannelSink::new();
    cloud
        .peer(6)
        .unwrap()
        .subscribe(
            "SELECT ?temp WHERE { GRAPH ?g { ?sensor <http://example.org/temperature> ?temp } }",
            NotificationKind::Binding,
            Arc::new(sink),
        )
        .await
        .unwrap();

    cloud
        .peer(2)
        .unwrap()
        .publish(Quadruple::new(
            Node::iri("http://example.org/reading/1"),
            Node::iri("http://example.org/sensor/1"),
            Node::iri("http://example.org/temperature"),
            Node::literal("21.5"),
        ))
        .await
        .unwrap();

    let NotificationPayload::Binding(binding) = next(&mut notifications).await.payload else {
        panic!("expected a binding")
    };
    assert_eq!(binding.get("temp"), Some(&Node::literal("21.5")));
    cloud.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_unsubscribe_removes_every_subsubscription() {
    let cloud = EventCloud::start(OverlayConfig::default()).unwrap();
    let (sink, mut notifications) = ChannelSink::new();
    let home = cloud.peer(0).unwrap();
    let id =
        home.subscribe(FOAF_SUBSCRIPTION, NotificationKind::Binding, Arc::new(sink)).await.unwrap();

    let indexed: usize = cloud.peers().iter().map(|p| p.indexed_subsubscription_count()).sum();
    assert!(indexed >= 2);
    assert_eq!(home.subscription_count(), 1);

    home.unsubscribe(id).await.unwrap();
    assert_eq!(home.subscription_count(), 0);
    for peer in cloud.peers() {
        assert_eq!(peer.indexed_subsubscription_count(), 0);
    }

    cloud.peer(4).unwrap().publish_batch(person(9, "Gina", "gina@example.org")).await.unwrap();
    assert_silent(&mut notifications).await;
    assert!(matches!(home.unsubscribe(id).await, Err(Error::Registry(_))));
    cloud.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_unsupported_filter_is_rejected() {
    let cloud = EventCloud::start(OverlayConfig::default()).unwrap();
    let (sink, _notifications) = ChannelSink::new();
    let home = cloud.peer(0).unwrap();
    let result = home
        .subscribe(
            "PREFIX foaf: <http://xmlns.com/foaf/0.1/>
             SELECT ?name WHERE { GRAPH ?g { ?id foaf:name ?name FILTER regex(?name, \"^A\") } }",
            NotificationKind::Binding,
            Arc::new(sink),
        )
        .await;
    assert!(matches!(result, Err(Error::UnsupportedFilterExpression(_))));
    assert_eq!(home.subscription_count(), 0);
    for peer in cloud.peers() {
        assert_eq!(peer.indexed_subsubscription_count(), 0);
    }
    cloud.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_subscription_without_graph_is_malformed() {
    let cloud = EventCloud::start(OverlayConfig::default()).unwrap();
    let (sink, _notifications) = ChannelSink::new();
    let result = cloud
        .peer(0)
        .unwrap()
        .subscribe("SELECT ?s WHERE { ?s ?p ?o }", NotificationKind::Binding, Arc::new(sink))
        .await;
    assert!(matches!(result, Err(Error::MalformedSubscription(_))));
    cloud.shutdown().await;
}
