use keel_core::Urn;

#[test]
fn top_level_urn_layout() {
    let urn = Urn::new("dev", "web", None, "aws:s3:Bucket", "assets");
    assert_eq!(urn.as_str(), "urn:keel:dev::web::aws:s3:Bucket::assets");
    assert_eq!(urn.stack(), "dev");
    assert_eq!(urn.project(), "web");
    assert_eq!(urn.qualified_type(), "aws:s3:Bucket");
    assert_eq!(urn.type_token(), "aws:s3:Bucket");
    assert_eq!(urn.name(), "assets");
}

#[test]
fn child_urn_carries_parent_type_chain() {
    let vpc = Urn::new("dev", "web", None, "app:net:Vpc", "main");
    let subnet = Urn::child(&vpc, "aws:ec2:Subnet", "a");
    let route = Urn::child(&subnet, "aws:ec2:Route", "default");

    assert_eq!(subnet.qualified_type(), "app:net:Vpc$aws:ec2:Subnet");
    assert_eq!(subnet.type_token(), "aws:ec2:Subnet");
    assert_eq!(
        route.as_str(),
        "urn:keel:dev::web::app:net:Vpc$aws:ec2:Subnet$aws:ec2:Route::default"
    );
    assert_eq!(route.type_token(), "aws:ec2:Route");
}

#[test]
fn same_name_under_different_parents_is_distinct() {
    let a = Urn::new("dev", "web", None, "app:Group", "a");
    let b = Urn::new("dev", "web", None, "app:Other", "b");
    assert_ne!(Urn::child(&a, "t:Thing", "x"), Urn::child(&b, "t:Thing", "x"));
}

#[test]
fn name_may_contain_delimiter() {
    let urn = Urn::new("dev", "web", None, "t:Thing", "odd::name");
    let parsed: Urn = urn.as_str().parse().unwrap();
    assert_eq!(parsed.name(), "odd::name");
}

#[test]
fn malformed_urns_are_rejected() {
    assert!("not-a-urn".parse::<Urn>().is_err());
    assert!("urn:keel:dev::web".parse::<Urn>().is_err());
    assert!("urn:keel:::web::t:Thing::x".parse::<Urn>().is_err());
    assert!(serde_json::from_str::<Urn>("\"urn:other:dev::web::t::x\"").is_err());
}

#[test]
fn serializes_as_plain_string() {
    let urn = Urn::new("dev", "web", None, "t:Thing", "x");
    let json = serde_json::to_string(&urn).unwrap();
    assert_eq!(json, "\"urn:keel:dev::web::t:Thing::x\"");
    assert_eq!(serde_json::from_str::<Urn>(&json).unwrap(), urn);
}
