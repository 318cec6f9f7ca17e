//! End-to-end reconciliation against the in-memory backends

use ovs_switch::{
    converge, DesiredBridge, LinkManager, MemorySwitchDb, Port, ReadinessPolicy, StaticLinks,
    SwitchDatabase, SwitchError, SwitchHandle, TunnelFailure,
};

fn desired() -> DesiredBridge {
    DesiredBridge {
        bridge: "br0".to_string(),
        ports: vec!["veth1".to_string(), "veth2".to_string()],
        controller: Some("10.0.0.5:6653".to_string()),
        tunnel_peers: vec!["192.168.10.2".to_string(), "fd00::2".to_string()],
    }
}

#[tokio::test]
async fn test_converges_from_empty_and_reruns_without_writes() {
    let db = MemorySwitchDb::new();
    let links = StaticLinks::new();
    let policy = ReadinessPolicy::default();

    let iface = converge(&db, &links, &desired(), &policy).await.unwrap();
    assert_eq!(iface.name, "br0");

    assert_eq!(db.bridges(), vec!["br0"]);
    let mut names: Vec<String> = db.ports_on("br0").iter().map(|p| p.name().to_string()).collect();
    names.sort();
    let v6_name = ovs_switch::vtep_port_name_for("fd00::2").unwrap();
    let mut expected = vec![
        "br0".to_string(),
        "veth1".to_string(),
        "veth2".to_string(),
        "vx4c0a80a02".to_string(),
        v6_name,
    ];
    expected.sort();
    assert_eq!(names, expected);

    let controllers = db.controllers_on("br0");
    assert_eq!(controllers.len(), 1);
    assert_eq!(controllers[0].target(), "tcp:10.0.0.5:6653");

    let tunnels: Vec<Port> = db
        .ports_on("br0")
        .into_iter()
        .filter(|p| matches!(p, Port::Tunnel { .. }))
        .collect();
    assert_eq!(tunnels.len(), 2);

    let after_first = db.mutations();
    assert_eq!(after_first, 6);

    converge(&db, &links, &desired(), &policy).await.unwrap();
    assert_eq!(db.mutations(), after_first);
}

#[tokio::test]
async fn test_partial_tunnel_failure_keeps_earlier_endpoints() {
    let db = MemorySwitchDb::new();
    let sw = SwitchHandle::open_or_create(&db, &StaticLinks::new(), "br0", &ReadinessPolicy::default())
        .await
        .unwrap();

    let peers = ["10.1.0.1", "10.1.0.2", "10.1.0.3", "10.1.0.4"];
    db.fail_create_of(ovs_switch::vtep_port_name_for(peers[2]).unwrap());

    let err = sw.ensure_tunnel_endpoints(&db, &peers).await.unwrap_err();
    match &err {
        SwitchError::TunnelCreate { peer, source, .. } => {
            assert_eq!(peer, "10.1.0.3");
            assert!(matches!(source, TunnelFailure::Backend(_)));
        }
        other => panic!("unexpected error: {other}"),
    }

    assert!(db.port_exists("vx40a010001").await.unwrap());
    assert!(db.port_exists("vx40a010002").await.unwrap());
    assert!(!db.port_exists("vx40a010003").await.unwrap());
    assert!(!db.port_exists("vx40a010004").await.unwrap());

    // retrying just the remainder finishes the job once the backend recovers
    db.clear_failures();
    let created = sw.ensure_tunnel_endpoints(&db, &peers[2..]).await.unwrap();
    assert_eq!(created, vec!["vx40a010003", "vx40a010004"]);
}

#[tokio::test]
async fn test_delete_nonexistent_bridge_only_checks_existence() {
    let db = MemorySwitchDb::new();
    let sw = SwitchHandle::attach("ghost0");

    let err = sw.delete(&db).await.unwrap_err();
    assert!(matches!(err, SwitchError::NotFound(ref name) if name == "ghost0"));
    assert_eq!(db.calls(), vec!["bridge_exists(ghost0)".to_string()]);
    assert_eq!(db.mutations(), 0);
}

#[tokio::test]
async fn test_set_controller_rejects_wide_port_without_db() {
    let db = MemorySwitchDb::new();
    let mut sw = SwitchHandle::attach("br0");

    let err = sw.set_controller(&db, "10.0.0.5", "99999").await.unwrap_err();
    assert!(matches!(err, SwitchError::InvalidEndpoint { .. }));
    assert!(db.calls().is_empty());
}

#[tokio::test]
async fn test_handle_usable_through_trait_objects() {
    let db: Box<dyn SwitchDatabase> = Box::new(MemorySwitchDb::new());
    let links: Box<dyn LinkManager> = Box::new(StaticLinks::new());

    let sw = SwitchHandle::open_or_create(db.as_ref(), links.as_ref(), "br7", &ReadinessPolicy::default())
        .await
        .unwrap();
    sw.add_port(db.as_ref(), "veth7").await.unwrap();
    assert!(db.port_exists("veth7").await.unwrap());
}
