use std::error::Error;

use ldap3::LdapConn;

pub fn ldap_connect() -> Result<LdapConn, Box<dyn Error>> {
	let mut conn = LdapConn::new("ldap://localhost:1389")?;
	conn.simple_bind("cn=admin,dc=example,dc=org", "adminpassword")?.success()?;
	Ok(conn)
}

pub fn ldap_add_organizational_unit(conn: &mut LdapConn, ou: &str) -> Result<(), Box<dyn Error>> {
	conn.add(
		&format!("ou={ou},dc=example,dc=org"),
		vec![("objectClass", ["organizationalUnit"].into())],
	)?
	.success()?;
	Ok(())
}

pub fn ldap_delete_organizational_unit(
	conn: &mut LdapConn,
	ou: &str,
) -> Result<(), Box<dyn Error>> {
	conn.delete(&format!("ou={ou},dc=example,dc=org"))?.success()?;
	Ok(())
}

pub fn ldap_add_person(
	conn: &mut LdapConn,
	ou: &str,
	cn: &str,
	sn: &str,
) -> Result<(), Box<dyn Error>> {
	conn.add(
		&format!("cn={cn},ou={ou},dc=example,dc=org"),
		vec![
			("objectClass", ["inetOrgPerson"].into()),
			("sn", [sn].into()),
			("uid", [cn].into()),
		],
	)?
	.success()?;
	Ok(())
}

/// Best-effort cleanup of every entry directly under an organizational
/// unit, then the unit itself.
pub fn ldap_cleanup_organizational_unit(conn: &mut LdapConn, ou: &str) {
	let base = format!("ou={ou},dc=example,dc=org");
	if let Ok(result) =
		conn.search(&base, ldap3::Scope::OneLevel, "(objectClass=*)", vec!["1.1"])
	{
		if let Ok((entries, _)) = result.success() {
			for entry in entries {
				let entry = ldap3::SearchEntry::construct(entry);
				let _ = conn.delete(&entry.dn);
			}
		}
	}
	let _ = conn.delete(&base);
}
