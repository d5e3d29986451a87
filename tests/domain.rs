use lead_call_orchestrator::domain::Service;

#[test]
fn service_parse_accepts_exactly_the_three_known_tags() {
    assert_eq!(Service::parse("Infissi"), Some(Service::Infissi));
    assert_eq!(Service::parse("Vetrate"), Some(Service::Vetrate));
    assert_eq!(Service::parse("Pergole"), Some(Service::Pergole));
    assert_eq!(Service::parse("infissi"), None);
    assert_eq!(Service::parse("Tende"), None);
}

#[test]
fn service_as_str_round_trips_through_parse() {
    for service in [Service::Infissi, Service::Vetrate, Service::Pergole] {
        assert_eq!(Service::parse(service.as_str()), Some(service));
    }
}

#[test]
fn business_name_groups_vetrate_and_pergole_under_the_same_brand() {
    assert_eq!(Service::Infissi.business_name(), "Ristrutturiamolo");
    assert_eq!(Service::Vetrate.business_name(), "UNICOVETRATE");
    assert_eq!(Service::Pergole.business_name(), "UNICOVETRATE");
}

#[test]
fn from_tag_matches_case_insensitively_on_a_substring() {
    assert_eq!(Service::from_tag("Lead - INFISSI - nord"), Some(Service::Infissi));
    assert_eq!(Service::from_tag("vetrate_prioritario"), Some(Service::Vetrate));
    assert_eq!(Service::from_tag("Pergole"), Some(Service::Pergole));
    assert_eq!(Service::from_tag("tende da sole"), None);
}

#[test]
fn display_matches_as_str() {
    assert_eq!(Service::Infissi.to_string(), "Infissi");
    assert_eq!(Service::Vetrate.to_string(), "Vetrate");
    assert_eq!(Service::Pergole.to_string(), "Pergole");
}
